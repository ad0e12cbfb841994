use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One record of a collection. Records are opaque to the sync engine; only
/// the domain code that owns a collection interprets their fields.
pub type Record = serde_json::Value;

/// The durable key of each entity collection. The serialized name doubles as
/// the storage key and the top-level key in a backup snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Transactions,
    BankAccounts,
    CreditCards,
    ForecastItems,
    Vehicles,
    VehicleExpenses,
    ScheduledMaintenances,
    FinancialGoals,
    GoalContributions,
    CustomCategories,
    FixedIncomeAssets,
    VariableIncomeAssets,
    TravelEvents,
    Renovations,
    RenovationExpenses,
    Suppliers,
    Materials,
}

impl Collection {
    pub const ALL: [Collection; 17] = [
        Collection::Transactions,
        Collection::BankAccounts,
        Collection::CreditCards,
        Collection::ForecastItems,
        Collection::Vehicles,
        Collection::VehicleExpenses,
        Collection::ScheduledMaintenances,
        Collection::FinancialGoals,
        Collection::GoalContributions,
        Collection::CustomCategories,
        Collection::FixedIncomeAssets,
        Collection::VariableIncomeAssets,
        Collection::TravelEvents,
        Collection::Renovations,
        Collection::RenovationExpenses,
        Collection::Suppliers,
        Collection::Materials,
    ];

    /// Collections that must be present for an external snapshot to be
    /// accepted as a backup of this application.
    pub const ANCHORS: [Collection; 2] = [Collection::Transactions, Collection::BankAccounts];

    pub fn key(&self) -> &'static str {
        match self {
            Collection::Transactions => "transactions",
            Collection::BankAccounts => "bankAccounts",
            Collection::CreditCards => "creditCards",
            Collection::ForecastItems => "forecastItems",
            Collection::Vehicles => "vehicles",
            Collection::VehicleExpenses => "vehicleExpenses",
            Collection::ScheduledMaintenances => "scheduledMaintenances",
            Collection::FinancialGoals => "financialGoals",
            Collection::GoalContributions => "goalContributions",
            Collection::CustomCategories => "customCategories",
            Collection::FixedIncomeAssets => "fixedIncomeAssets",
            Collection::VariableIncomeAssets => "variableIncomeAssets",
            Collection::TravelEvents => "travelEvents",
            Collection::Renovations => "renovations",
            Collection::RenovationExpenses => "renovationExpenses",
            Collection::Suppliers => "suppliers",
            Collection::Materials => "materials",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.key() == s)
            .ok_or_else(|| format!("unknown collection '{}'", s))
    }
}
