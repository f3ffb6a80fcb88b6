//! Policy enforcer: tiers form a total order general < mature < explicit.
//! A request at tier T admits a category at tier C iff C <= T.

use tracing::{info, warn};

use crate::category::{Category, PolicyTier};

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyViolation {
    pub category_id: String,
    pub required_tier: PolicyTier,
    pub requested_tier: PolicyTier,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyCheckResult {
    pub allowed: bool,
    pub violations: Vec<PolicyViolation>,
}

/// Stateless policy checker. Every decision is logged to the tracing
/// audit channel at the call site, per spec.md 4.G.
pub struct PolicyEnforcer;

impl PolicyEnforcer {
    pub fn new() -> Self {
        Self
    }

    /// `policy_allows(C, T) <=> tier(C) <= T`, applied across every
    /// category in `categories`, returning every offending category.
    pub fn check(&self, categories: &[&Category], requested_tier: PolicyTier) -> PolicyCheckResult {
        let mut violations = Vec::new();
        for category in categories {
            if category.policy_tier > requested_tier {
                violations.push(PolicyViolation {
                    category_id: category.id.clone(),
                    required_tier: category.policy_tier,
                    requested_tier,
                });
            }
        }

        let allowed = violations.is_empty();
        if allowed {
            info!(
                requested_tier = ?requested_tier,
                category_count = categories.len(),
                "policy check passed"
            );
        } else {
            warn!(
                requested_tier = ?requested_tier,
                violations = ?violations,
                "policy check denied"
            );
        }

        PolicyCheckResult { allowed, violations }
    }
}

impl Default for PolicyEnforcer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategoryType;

    fn category(id: &str, tier: PolicyTier) -> Category {
        Category {
            id: id.to_string(),
            category_type: CategoryType::Subject,
            display_name: id.to_string(),
            description: String::new(),
            policy_tier: tier,
            keywords: Default::default(),
            prompts: Default::default(),
            loras: Default::default(),
            settings: Default::default(),
            workflows: Default::default(),
            composition: Default::default(),
            schema_version: "1.0".to_string(),
        }
    }

    #[test]
    fn tier_order_holds() {
        assert!(PolicyTier::General < PolicyTier::Mature);
        assert!(PolicyTier::Mature < PolicyTier::Explicit);
    }

    #[test]
    fn general_request_denies_explicit_category() {
        let enforcer = PolicyEnforcer::new();
        let explicit_x = category("explicit_x", PolicyTier::Explicit);
        let result = enforcer.check(&[&explicit_x], PolicyTier::General);
        assert!(!result.allowed);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].category_id, "explicit_x");
        assert_eq!(result.violations[0].required_tier, PolicyTier::Explicit);
        assert_eq!(result.violations[0].requested_tier, PolicyTier::General);
    }

    #[test]
    fn equal_tier_is_allowed() {
        let enforcer = PolicyEnforcer::new();
        let mature = category("mature_x", PolicyTier::Mature);
        let result = enforcer.check(&[&mature], PolicyTier::Mature);
        assert!(result.allowed);
    }

    #[test]
    fn higher_request_tier_admits_lower_tier_category() {
        let enforcer = PolicyEnforcer::new();
        let general = category("general_x", PolicyTier::General);
        let result = enforcer.check(&[&general], PolicyTier::Explicit);
        assert!(result.allowed);
    }
}
