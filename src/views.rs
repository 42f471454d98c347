//! Branch-scoped order views for the cashier and admin dashboards.
//!
//! Everything here is a pure function over a synchronized order set:
//! branch filtering with alias tolerance, time windows, sales tallies,
//! best-sellers and customer-type classification.

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::order::{Order, OrderStatus, OrderType, MISSING_TEXT};
use crate::round_money;

pub const BEST_SELLER_LIMIT: usize = 10;

// ---------------------------------------------------------------------------
// Branch matching
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum BranchClass {
    SanJoseDelMonte,
    Fairview,
    Other(String),
}

fn classify_branch(label: &str) -> BranchClass {
    let normalized = label.trim().to_lowercase();
    if normalized.contains("san jose del monte") || normalized.contains("sjdm") {
        BranchClass::SanJoseDelMonte
    } else if normalized.contains("fairview") {
        BranchClass::Fairview
    } else {
        BranchClass::Other(normalized)
    }
}

/// Alias-tolerant branch comparison. "SJDM" and "San Jose del Monte" name
/// the same branch, every "Fairview" label names another, and all other
/// labels must match exactly after trimming and lowercasing.
pub fn branches_match(a: &str, b: &str) -> bool {
    classify_branch(a) == classify_branch(b)
}

pub fn filter_by_branch<'a>(orders: &'a [Order], branch: &str) -> Vec<&'a Order> {
    orders
        .iter()
        .filter(|order| branches_match(&order.branch, branch))
        .collect()
}

// ---------------------------------------------------------------------------
// Time windows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    Today,
    /// Monday through Sunday containing `today`.
    ThisWeek,
    ThisMonth,
    All,
}

impl TimeWindow {
    pub fn contains(self, date: Option<NaiveDate>, today: NaiveDate) -> bool {
        if self == TimeWindow::All {
            return true;
        }
        let Some(date) = date else {
            return false;
        };
        match self {
            TimeWindow::Today => date == today,
            TimeWindow::ThisWeek => {
                let monday =
                    today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
                date >= monday && date < monday + Duration::days(7)
            }
            TimeWindow::ThisMonth => date.year() == today.year() && date.month() == today.month(),
            TimeWindow::All => true,
        }
    }
}

pub fn filter_by_window<'a>(
    orders: impl IntoIterator<Item = &'a Order>,
    window: TimeWindow,
    today: NaiveDate,
) -> Vec<&'a Order> {
    orders
        .into_iter()
        .filter(|order| window.contains(order.local_date(), today))
        .collect()
}

// ---------------------------------------------------------------------------
// Tallies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesSummary {
    pub order_count: usize,
    pub completed_count: usize,
    pub pending_count: usize,
    /// Sum of totals over completed orders only.
    pub revenue: f64,
}

pub fn sales_summary<'a>(orders: impl IntoIterator<Item = &'a Order>) -> SalesSummary {
    let mut summary = SalesSummary::default();
    for order in orders {
        summary.order_count += 1;
        match order.status {
            OrderStatus::Completed => {
                summary.completed_count += 1;
                summary.revenue += order.total;
            }
            OrderStatus::Pending => summary.pending_count += 1,
            _ => {}
        }
    }
    summary.revenue = round_money(summary.revenue);
    summary
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestSeller {
    pub name: String,
    pub qty: u32,
}

/// Quantity per item name (case-insensitive) over completed orders, highest
/// first, ties in first-seen order, at most [`BEST_SELLER_LIMIT`] entries.
pub fn best_sellers<'a>(orders: impl IntoIterator<Item = &'a Order>) -> Vec<BestSeller> {
    let mut tallies: Vec<BestSeller> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for order in orders.into_iter().filter(|o| o.status.is_completed()) {
        for item in &order.items {
            let key = item.name.trim().to_lowercase();
            if key.is_empty() || item.name == MISSING_TEXT {
                continue;
            }
            match index.get(&key) {
                Some(&idx) => tallies[idx].qty += item.qty,
                None => {
                    index.insert(key, tallies.len());
                    tallies.push(BestSeller {
                        name: item.name.trim().to_string(),
                        qty: item.qty,
                    });
                }
            }
        }
    }

    // sort_by is stable, so equal quantities keep first-seen order
    tallies.sort_by(|a, b| b.qty.cmp(&a.qty));
    tallies.truncate(BEST_SELLER_LIMIT);
    tallies
}

// ---------------------------------------------------------------------------
// Customers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CustomerType {
    #[serde(rename = "Walk-in")]
    WalkIn,
    #[serde(rename = "Registered User")]
    Registered,
    Guest,
}

impl CustomerType {
    pub fn label(self) -> &'static str {
        match self {
            CustomerType::WalkIn => "Walk-in",
            CustomerType::Registered => "Registered User",
            CustomerType::Guest => "Guest",
        }
    }
}

impl fmt::Display for CustomerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn customer_type(order: &Order) -> CustomerType {
    if order.order_type == OrderType::WalkIn {
        return CustomerType::WalkIn;
    }
    let username = order.customer_username.trim();
    if !order.is_guest && !username.is_empty() && username != MISSING_TEXT {
        CustomerType::Registered
    } else {
        CustomerType::Guest
    }
}

/// Orders placed by one customer, matched on email or username
/// (case-insensitive), newest first.
pub fn customer_history<'a>(orders: &'a [Order], email_or_username: &str) -> Vec<&'a Order> {
    let wanted = email_or_username.trim().to_lowercase();
    if wanted.is_empty() || wanted == MISSING_TEXT.to_lowercase() {
        return Vec::new();
    }
    let mut history: Vec<&Order> = orders
        .iter()
        .filter(|order| {
            order.customer_email.trim().to_lowercase() == wanted
                || order.customer_username.trim().to_lowercase() == wanted
        })
        .collect();
    history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    history
}

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

/// Everything one dashboard screen shows for a branch and window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchDashboard {
    pub branch: String,
    pub orders: Vec<Order>,
    pub summary: SalesSummary,
    /// All-time, not limited to the window.
    pub best_sellers: Vec<BestSeller>,
}

impl BranchDashboard {
    /// `branch = None` is the admin view over every branch.
    pub fn build(
        orders: &[Order],
        branch: Option<&str>,
        window: TimeWindow,
        today: NaiveDate,
    ) -> Self {
        let scoped: Vec<&Order> = match branch {
            Some(label) => filter_by_branch(orders, label),
            None => orders.iter().collect(),
        };
        let mut windowed = filter_by_window(scoped.iter().copied(), window, today);
        windowed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Self {
            branch: branch.unwrap_or("All Branches").to_string(),
            summary: sales_summary(windowed.iter().copied()),
            best_sellers: best_sellers(scoped.iter().copied()),
            orders: windowed.into_iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderItem;
    use chrono::{Local, TimeZone, Utc};
    use serde_json::json;

    fn order(branch: &str, status: OrderStatus, total: f64) -> Order {
        let mut order =
            Order::from_remote(&json!({ "order_id": "ORD-001", "branch": branch })).unwrap();
        order.status = status;
        order.total = total;
        order
    }

    fn placed_on(mut order: Order, date: NaiveDate) -> Order {
        let naive = date.and_hms_opt(12, 0, 0).unwrap();
        let local = Local.from_local_datetime(&naive).earliest().unwrap();
        order.timestamp = Some(local.with_timezone(&Utc));
        order
    }

    fn with_items(mut order: Order, items: &[(&str, u32)]) -> Order {
        order.items = items
            .iter()
            .map(|(name, qty)| OrderItem {
                name: name.to_string(),
                qty: *qty,
                size: "Regular".into(),
                special: "None".into(),
                notes: String::new(),
                price: 79.0,
            })
            .collect();
        order
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn branch_aliases() {
        assert!(branches_match("SM SJDM", "San Jose Del Monte"));
        assert!(branches_match(" sm fairview ", "Fairview"));
        assert!(!branches_match("SM Fairview", "SJDM"));
        assert!(branches_match("Cubao", "cubao "));
        assert!(!branches_match("Cubao", "Cubao Expo"));
    }

    #[test]
    fn revenue_counts_completed_only() {
        let orders = vec![
            order("SJDM", OrderStatus::Completed, 100.0),
            order("SJDM", OrderStatus::Pending, 50.0),
        ];
        let summary = sales_summary(&orders);
        assert_eq!(summary.revenue, 100.0);
        assert_eq!(summary.order_count, 2);
        assert_eq!(summary.completed_count, 1);
        assert_eq!(summary.pending_count, 1);
    }

    #[test]
    fn time_windows() {
        // 2026-10-16 is a Friday.
        let today = day(2026, 10, 16);
        assert!(TimeWindow::Today.contains(Some(today), today));
        assert!(!TimeWindow::Today.contains(Some(day(2026, 10, 15)), today));
        assert!(TimeWindow::ThisWeek.contains(Some(day(2026, 10, 12)), today));
        assert!(TimeWindow::ThisWeek.contains(Some(day(2026, 10, 18)), today));
        assert!(!TimeWindow::ThisWeek.contains(Some(day(2026, 10, 11)), today));
        assert!(TimeWindow::ThisMonth.contains(Some(day(2026, 10, 1)), today));
        assert!(!TimeWindow::ThisMonth.contains(Some(day(2025, 10, 16)), today));
        assert!(!TimeWindow::Today.contains(None, today));
        assert!(TimeWindow::All.contains(None, today));
    }

    #[test]
    fn today_window_falls_back_to_raw_date() {
        let mut o = order("SJDM", OrderStatus::Pending, 10.0);
        o.date = Some("10/16/2026".into());
        let today = day(2026, 10, 16);
        assert_eq!(filter_by_window([&o], TimeWindow::Today, today).len(), 1);
    }

    #[test]
    fn best_sellers_are_completed_only_case_insensitive_and_stable() {
        let orders = vec![
            with_items(
                order("SJDM", OrderStatus::Completed, 0.0),
                &[("Mango Tango", 2), ("Buko Pandan", 3)],
            ),
            with_items(
                order("SJDM", OrderStatus::Completed, 0.0),
                &[("mango tango", 1), ("Lemon Cane", 1)],
            ),
            with_items(order("SJDM", OrderStatus::Pending, 0.0), &[("Lemon Cane", 9)]),
        ];
        let top = best_sellers(&orders);
        assert_eq!(
            top,
            vec![
                BestSeller { name: "Mango Tango".into(), qty: 3 },
                BestSeller { name: "Buko Pandan".into(), qty: 3 },
                BestSeller { name: "Lemon Cane".into(), qty: 1 },
            ]
        );
    }

    #[test]
    fn best_sellers_cap_at_ten() {
        let names: Vec<String> = (0..15).map(|i| format!("Juice {i}")).collect();
        let items: Vec<(&str, u32)> = names.iter().map(|n| (n.as_str(), 1)).collect();
        let orders = vec![with_items(order("SJDM", OrderStatus::Completed, 0.0), &items)];
        assert_eq!(best_sellers(&orders).len(), BEST_SELLER_LIMIT);
    }

    #[test]
    fn customer_types() {
        let mut walk_in = order("SJDM", OrderStatus::Pending, 0.0);
        walk_in.order_type = OrderType::WalkIn;
        walk_in.is_guest = false;
        walk_in.customer_username = "ana".into();
        assert_eq!(customer_type(&walk_in), CustomerType::WalkIn);

        let mut registered = order("SJDM", OrderStatus::Pending, 0.0);
        registered.customer_username = "ana".into();
        assert_eq!(customer_type(&registered), CustomerType::Registered);

        registered.is_guest = true;
        assert_eq!(customer_type(&registered), CustomerType::Guest);

        let mut anonymous = order("SJDM", OrderStatus::Pending, 0.0);
        anonymous.customer_username = "N/A".into();
        assert_eq!(customer_type(&anonymous), CustomerType::Guest);
    }

    #[test]
    fn history_matches_email_or_username_newest_first() {
        let mut older = placed_on(order("SJDM", OrderStatus::Completed, 1.0), day(2026, 10, 1));
        older.customer_email = "Ana@Mail.com".into();
        let mut newer = placed_on(order("SJDM", OrderStatus::Pending, 2.0), day(2026, 10, 10));
        newer.customer_username = "ana@mail.com".into();
        let other = order("SJDM", OrderStatus::Pending, 3.0);

        let orders = vec![older, other, newer];
        let history = customer_history(&orders, "ana@mail.com");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].total, 2.0);
        assert!(customer_history(&orders, "N/A").is_empty());
    }

    #[test]
    fn dashboard_scopes_branch_and_window() {
        let today = day(2026, 10, 16);
        let orders = vec![
            placed_on(order("SM Fairview", OrderStatus::Completed, 100.0), today),
            placed_on(order("Fairview", OrderStatus::Pending, 50.0), today),
            placed_on(order("SM Fairview", OrderStatus::Completed, 70.0), day(2026, 9, 1)),
            placed_on(order("SJDM", OrderStatus::Completed, 500.0), today),
        ];

        let dash = BranchDashboard::build(&orders, Some("SM Fairview"), TimeWindow::Today, today);
        assert_eq!(dash.orders.len(), 2);
        assert_eq!(dash.summary.revenue, 100.0);

        let admin = BranchDashboard::build(&orders, None, TimeWindow::ThisMonth, today);
        assert_eq!(admin.summary.order_count, 3);
        assert_eq!(admin.summary.revenue, 600.0);
        assert_eq!(admin.branch, "All Branches");
    }
}
