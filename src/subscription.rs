//! Subscription tiers and the features / limits each one unlocks.

use crate::error::ApiError;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString, EnumIter, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Tier {
    Free,
    Basic,
    Professional,
    Enterprise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Feature {
    Attendance,
    LeaveManagement,
    ChangeRequests,
    VisitorManagement,
    Reports,
    AuditLogs,
    Lpr,
    FaceCheckIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Employees,
    Cameras,
}

impl Feature {
    /// Lowest tier that includes the feature.
    pub fn minimum_tier(self) -> Tier {
        match self {
            Feature::Attendance | Feature::LeaveManagement => Tier::Free,
            Feature::ChangeRequests | Feature::VisitorManagement | Feature::Reports => Tier::Basic,
            Feature::AuditLogs | Feature::Lpr => Tier::Professional,
            Feature::FaceCheckIn => Tier::Enterprise,
        }
    }
}

impl Tier {
    pub fn has(self, feature: Feature) -> bool {
        self >= feature.minimum_tier()
    }

    /// `None` means unlimited.
    pub fn limit(self, limit: Limit) -> Option<i64> {
        match (self, limit) {
            (Tier::Free, Limit::Employees) => Some(10),
            (Tier::Free, Limit::Cameras) => Some(1),
            (Tier::Basic, Limit::Employees) => Some(50),
            (Tier::Basic, Limit::Cameras) => Some(5),
            (Tier::Professional, Limit::Employees) => Some(250),
            (Tier::Professional, Limit::Cameras) => Some(25),
            (Tier::Enterprise, _) => None,
        }
    }

    pub fn require(self, feature: Feature) -> Result<(), ApiError> {
        if self.has(feature) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "Feature '{feature}' is not available on the {tier} plan (requires {})",
                feature.minimum_tier(),
                tier = self
            )))
        }
    }

    /// Fails when adding one more item would exceed the tier's limit.
    pub fn check_capacity(self, limit: Limit, current: i64) -> Result<(), ApiError> {
        match self.limit(limit) {
            Some(max) if current >= max => Err(ApiError::forbidden(format!(
                "The {tier} plan allows at most {max} {}",
                match limit {
                    Limit::Employees => "employees",
                    Limit::Cameras => "cameras",
                },
                tier = self
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn tiers_are_ordered() {
        let tiers: Vec<Tier> = Tier::iter().collect();
        assert!(tiers.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn features_unlock_progressively() {
        assert!(Tier::Free.has(Feature::Attendance));
        assert!(!Tier::Free.has(Feature::VisitorManagement));
        assert!(Tier::Basic.has(Feature::VisitorManagement));
        assert!(!Tier::Basic.has(Feature::Lpr));
        assert!(Tier::Professional.has(Feature::Lpr));
        assert!(!Tier::Professional.has(Feature::FaceCheckIn));
        assert!(Tier::Enterprise.has(Feature::FaceCheckIn));
    }

    #[test]
    fn require_names_the_plan() {
        let err = Tier::Free.require(Feature::Lpr).unwrap_err();
        assert!(err.to_string().contains("free"));
        assert!(err.to_string().contains("professional"));
    }

    #[test]
    fn capacity_is_checked_before_insert() {
        assert!(Tier::Free.check_capacity(Limit::Employees, 9).is_ok());
        assert!(Tier::Free.check_capacity(Limit::Employees, 10).is_err());
        assert!(Tier::Free.check_capacity(Limit::Cameras, 1).is_err());
        assert!(Tier::Enterprise.check_capacity(Limit::Cameras, 10_000).is_ok());
    }

    #[test]
    fn tier_parses_from_column_value() {
        assert_eq!("professional".parse::<Tier>().unwrap(), Tier::Professional);
        assert!("platinum".parse::<Tier>().is_err());
    }
}
