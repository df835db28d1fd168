//! Rendering of the legacy claim report text.
//!
//! Downstream consumers read this artifact by column position, so the field
//! order, the fixed empty legacy columns, the quoted cells and even the
//! stray padding spaces are reproduced exactly. Rows end with CR; header and
//! subtotal lines end with CRLF.

use crate::engine::aggregate::{RouteBlock, TripSummary};

/// Decorative line above every column header.
pub const PRE_HEADER: &str = "\r,, ,, ,, , , ,,,,,, ,,Verified Data, ,,, , , , ,,, ,,,,ETM Boarding Passenger Count,, , ,,,,,,,,,,\r\n";

/// The 41-column header, emitted at the top of every direction block.
pub const HEADER: &str = "Route No.,OD,IB/OB,Trip No.,Service Date,Start Point,RPH No.,Bus Plate Number,Bus Age,Charge/KM,Driver ID,Bus Stop Travel,Travel (KM),Total Claim,Travel (KM) GPS,Total Claim GPS,Status,\"status of the trip (duplicate, trip outside schedule,no gps tracking, breakdown, replacement)\",KM as per BOP = ,Claim as per BOP (RM),Missed trip if no gps tracking,Start Point,Service Start Time,Actual Start Time,Sales Start Time,Service End Time,Actual End Time,Sales End Time,Punctuality,Passengers Boarding Count,Total Sales Amount (RM),Total On,Transfer Count,Monthly Pass,Adult,Child,Senior,Student,OKU,JKM,MAIM,\r\n";

/// Running totals carried across one hierarchy level.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    adults: u64,
    children: u64,
    seniors: u64,
    oku: u64,
    bus_stops: u64,
    km_planned: f64,
    claim: f64,
    km_gps: f64,
    claim_gps: f64,
    amount: f64,
}

impl Tally {
    fn absorb(&mut self, summary: &TripSummary) {
        self.adults += u64::from(summary.adults);
        self.children += u64::from(summary.children);
        self.seniors += u64::from(summary.seniors);
        self.oku += u64::from(summary.oku);
        self.bus_stops += summary.bus_stops as u64;
        self.km_planned += summary.km_planned;
        self.claim += summary.total_claim;
        self.km_gps += summary.km_gps;
        self.claim_gps += summary.total_claim_gps;
        self.amount += summary.total_amount;
    }

    fn merge(&mut self, other: &Tally) {
        self.adults += other.adults;
        self.children += other.children;
        self.seniors += other.seniors;
        self.oku += other.oku;
        self.bus_stops += other.bus_stops;
        self.km_planned += other.km_planned;
        self.claim += other.claim;
        self.km_gps += other.km_gps;
        self.claim_gps += other.claim_gps;
        self.amount += other.amount;
    }

    fn pax(&self) -> u64 {
        self.adults + self.children + self.seniors + self.oku
    }
}

/// Renders the whole report: per-direction blocks with header and rows,
/// subtotals at the direction, date and route boundaries, and the grand
/// total at the end of the dataset.
pub fn render(routes: &[RouteBlock]) -> String {
    let mut out = String::new();
    let mut grand_tally = Tally::default();

    for route in routes {
        let mut route_tally = Tally::default();

        for date_block in &route.dates {
            let mut date_tally = Tally::default();
            let date_label = date_block.service_date.format("%d/%m/%Y").to_string();

            for group in &date_block.directions {
                let mut direction_tally = Tally::default();

                out.push_str(PRE_HEADER);
                out.push_str(HEADER);
                for summary in &group.summaries {
                    out.push_str(&trip_row(summary));
                    direction_tally.absorb(summary);
                }

                let label = format!(
                    "Total ({} - {} {})",
                    date_label, route.route_short_name, route.route_name
                );
                out.push_str(&subtotal_row(&label, &direction_tally));
                date_tally.merge(&direction_tally);
            }

            let label = format!("Total For Service Date : {} ", date_label);
            out.push_str(&subtotal_row(&label, &date_tally));
            route_tally.merge(&date_tally);
        }

        let label = format!(
            "Total For Route {} {} : ",
            route.route_short_name, route.route_name
        );
        out.push_str(&subtotal_row(&label, &route_tally));
        grand_tally.merge(&route_tally);
    }

    out.push_str(&subtotal_row("Grand Total :", &grand_tally));
    out
}

fn opt_i32(value: Option<i32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn opt_f64(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// One per-trip row: 42 positional fields, the last one empty, CR-terminated.
fn trip_row(s: &TripSummary) -> String {
    let cells = [
        s.route_short_name.clone(),
        format!("{} {}", s.route_short_name, s.route_name),
        s.direction.to_string(),
        s.trip_label.clone(),
        format!("\"{} \" ", s.service_date),
        s.start_point.clone(),
        s.trip_id.clone(),
        s.bus_plate.clone(),
        opt_i32(s.bus_age),
        opt_f64(s.km_rate),
        s.driver_id.clone(),
        s.bus_stops.to_string(),
        format!("{:.2}", s.km_planned),
        s.total_claim.to_string(),
        format!("{:.2}", s.km_gps),
        s.total_claim_gps.to_string(),
        s.status.clone(),
        s.status_detail.clone(),
        format!("{:.2}", s.km_bop),
        opt_f64(s.km_rate_bop),
        String::new(),
        s.observed_start.clone(),
        s.service_start.clone(),
        s.actual_start.clone(),
        s.sales_start.clone(),
        s.service_end.clone(),
        s.actual_end.clone(),
        s.sales_end.clone(),
        s.punctuality.clone(),
        format!(" {}", s.passenger),
        format!("{:.2}", s.total_amount),
        s.total_on.to_string(),
        s.transfer_count.to_string(),
        s.monthly_pass.to_string(),
        s.adults.to_string(),
        s.children.to_string(),
        format!("{} ", s.seniors),
        s.students.to_string(),
        s.oku.to_string(),
        s.jkm.to_string(),
        format!(" {}", s.maim),
    ];
    format!("{},\r", cells.join(","))
}

/// One subtotal row; the numeric tail lines up with the trip-row columns it
/// totals, the rest stays empty.
fn subtotal_row(label: &str, tally: &Tally) -> String {
    format!(
        ", ,,,{label},,,,,,,{},{:.2},{},{:.2},{},,,,,,,,,,,,,,0,{:.2},{},0,0,{},{},{},0,{},0,0\r\n",
        tally.bus_stops,
        tally.km_planned,
        tally.claim,
        tally.km_gps,
        tally.claim_gps,
        tally.amount,
        tally.pax(),
        tally.adults,
        tally.children,
        tally.seniors,
        tally.oku,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::aggregate::{
        DateBlock, DateRouteDirectionGroup, GroupRollup, summarize_trip,
    };
    use crate::engine::geo_cache::GeoHitCache;
    use crate::engine::REPORT_TZ;
    use crate::model::Direction;
    use crate::testutil::{instant, transaction};
    use chrono::NaiveDate;

    fn sample_summary() -> TripSummary {
        let mut trx = transaction("RPH-1");
        trx.started_at = Some(instant("2024-08-20T08:03:00+08:00"));
        trx.ended_at = Some(instant("2024-08-20T08:40:00+08:00"));
        trx.scheduled_at = Some(instant("2024-08-20T08:00:00+08:00"));
        trx.scheduled_end = Some(instant("2024-08-20T08:35:00+08:00"));
        trx.adults = 3;
        trx.amount = 5.25;
        let mut cache = GeoHitCache::new();
        summarize_trip(&[trx], "T1".to_string(), &[], None, &mut cache, REPORT_TZ)
    }

    fn sample_routes() -> Vec<RouteBlock> {
        let summary = sample_summary();
        vec![RouteBlock {
            route_id: 10,
            route_short_name: "T590".to_string(),
            route_name: "Terminal - Sentral".to_string(),
            dates: vec![DateBlock {
                service_date: NaiveDate::from_ymd_opt(2024, 8, 20).unwrap(),
                directions: vec![DateRouteDirectionGroup {
                    route_id: 10,
                    service_date: NaiveDate::from_ymd_opt(2024, 8, 20).unwrap(),
                    direction: Direction::Outbound,
                    summaries: vec![summary],
                    rollup: GroupRollup::default(),
                }],
            }],
        }]
    }

    #[test]
    fn test_trip_row_has_42_positional_fields() {
        let row = trip_row(&sample_summary());
        // None of the fixture's cells contain commas, so counting commas
        // counts field boundaries: 41 named fields plus the legacy trailing
        // empty field make 41 separators.
        assert_eq!(row.matches(',').count(), 41);
        assert!(row.ends_with(",\r"));
        assert!(row.contains("\"20/08/2024 \" "));
        assert!(row.contains("08:03"));
    }

    #[test]
    fn test_subtotal_row_shape() {
        let mut tally = Tally::default();
        tally.absorb(&sample_summary());

        let row = subtotal_row("Grand Total :", &tally);
        assert_eq!(row.matches(',').count(), 40);
        assert!(row.ends_with("\r\n"));
        assert!(row.contains("Grand Total :"));
        // Amount is currency formatted.
        assert!(row.contains(",5.25,"), "row was {row}");
        assert!(row.contains(",3,"), "adults total missing: {row}");
    }

    #[test]
    fn test_render_emits_header_per_direction_and_all_subtotals() {
        let rendered = render(&sample_routes());

        assert_eq!(rendered.matches("Route No.,OD,IB/OB").count(), 1);
        assert_eq!(rendered.matches("Verified Data").count(), 1);
        assert!(rendered.contains("Total (20/08/2024 - T590 Terminal - Sentral)"));
        assert!(rendered.contains("Total For Service Date : 20/08/2024 "));
        assert!(rendered.contains("Total For Route T590 Terminal - Sentral : "));
        assert!(rendered.trim_end().ends_with("0,0"));
        assert!(rendered.contains("Grand Total :"));
    }

    #[test]
    fn test_render_empty_dataset_is_just_the_grand_total() {
        let rendered = render(&[]);
        assert!(rendered.starts_with(", ,,,Grand Total :"));
        assert_eq!(rendered.matches("\r\n").count(), 1);
    }
}
