// =============================================================================
// Employee Directory — pure lookup over a static demo document
// =============================================================================
//
// The engine consumes employees opaquely; this directory exists so the HTTP
// surface can resolve an employee_id to a full record without a real HR
// integration. Firm-level context (firm_restrictions, quick_reference) is
// injected into every record at lookup time so rule code sees it alongside
// the per-employee fields.
// =============================================================================

use serde_json::json;
use tracing::debug;

use crate::types::Employee;

pub struct EmployeeDirectory {
    records: Vec<Employee>,
}

impl Default for EmployeeDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl EmployeeDirectory {
    pub fn new() -> Self {
        let document = json!([
            {
                "id": "EMP001",
                "role": "Trader",
                "division": "Equities",
                "tier": 1,
                "restricted_tickers": ["GME", "AMC"],
                "can_trade": true,
                "coverage_stocks": [],
                "active_deals": [],
            },
            {
                "id": "EMP002",
                "role": "Analyst",
                "division": "Equity Research",
                "tier": 2,
                "restricted_tickers": ["AAPL"],
                "can_trade": true,
                "coverage_stocks": ["AAPL", "MSFT"],
                "active_deals": [],
            },
            {
                "id": "EMP003",
                "role": "Analyst",
                "division": "Equity Research",
                "tier": 2,
                "restricted_tickers": ["AAPL", "TSLA", "MSFT", "GOOGL"],
                "can_trade": true,
                "coverage_stocks": ["AAPL", "TSLA", "MSFT", "GOOGL"],
                "active_deals": [
                    { "company": "Nimbus Robotics", "type": "IPO", "status": "active" }
                ],
            },
            {
                "id": "EMP004",
                "role": "Investment Banker",
                "division": "M&A",
                "tier": 1,
                "restricted_tickers": [],
                "can_trade": false,
                "coverage_stocks": [],
                "active_deals": [
                    { "company": "Atlas Freight", "type": "Acquisition", "status": "active" }
                ],
            },
            {
                "id": "EMP005",
                "role": "Compliance Officer",
                "division": "Legal & Compliance",
                "tier": 3,
                "restricted_tickers": [],
                "can_trade": true,
                "coverage_stocks": [],
                "active_deals": [],
            },
            {
                "id": "EMP006",
                "role": "Operations",
                "division": "Back Office",
                "tier": 3,
                "restricted_tickers": [],
                "can_trade": true,
                "coverage_stocks": [],
                "active_deals": [],
            },
        ]);

        let records: Vec<Employee> =
            serde_json::from_value(document).expect("static employee document is well-formed");

        Self { records }
    }

    /// Resolve an employee id, injecting firm-level context into the record.
    pub fn lookup(&self, employee_id: &str, firm_name: &str) -> Option<Employee> {
        let mut employee = self
            .records
            .iter()
            .find(|e| e.id == employee_id)
            .cloned()?;

        employee.extra.insert(
            "firm_restrictions".to_string(),
            json!(format!("Standard {firm_name} trading policy applies")),
        );
        employee.extra.insert(
            "quick_reference".to_string(),
            json!("Restricted tickers are an absolute bar; coverage stocks need pre-approval"),
        );

        debug!(employee_id, firm = %firm_name, "employee resolved");
        Some(employee)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_employee_resolves_with_firm_context() {
        let directory = EmployeeDirectory::new();
        let emp = directory.lookup("EMP002", "Meridian").unwrap();
        assert_eq!(emp.role, "Analyst");
        assert_eq!(emp.extra["tier"], 2);
        assert!(emp.extra["firm_restrictions"]
            .as_str()
            .unwrap()
            .contains("Meridian"));
        assert!(emp.extra.contains_key("quick_reference"));
    }

    #[test]
    fn unknown_employee_is_none() {
        let directory = EmployeeDirectory::new();
        assert!(directory.lookup("EMP999", "Meridian").is_none());
    }

    #[test]
    fn banker_cannot_trade_flag_survives() {
        let directory = EmployeeDirectory::new();
        let emp = directory.lookup("EMP004", "Meridian").unwrap();
        assert_eq!(emp.extra["can_trade"], false);
        assert_eq!(emp.extra["active_deals"][0]["type"], "Acquisition");
    }
}
