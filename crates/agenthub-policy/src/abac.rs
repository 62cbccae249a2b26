use tracing::debug;

use agenthub_core::policy::{
    Decision, DecisionPayload, EnvironmentContext, PolicyDecision, PrincipalContext,
    ResourceContext,
};
use agenthub_core::types::Timestamp;
use agenthub_crypto::{canonical, sign, verify, Secret};

/// ABAC evaluator. Checks run in a fixed order:
///
/// 1. `abac.tenant_mismatch`   — principal and resource tenants differ;
/// 2. `abac.action_not_allowed` — action outside the principal's allow-list;
/// 3. `abac.mfa_required`      — environment demands MFA the principal lacks.
///
/// All checks always run, so `violation_codes` lists every failure, not just
/// the first.
pub struct PolicyEvaluator {
    policy_secret: Secret,
}

impl PolicyEvaluator {
    pub fn new(policy_secret: Secret) -> Self {
        Self { policy_secret }
    }

    pub fn evaluate(
        &self,
        principal: &PrincipalContext,
        resource: &ResourceContext,
        environment: &EnvironmentContext,
        action: &str,
        now: Timestamp,
    ) -> PolicyDecision {
        let mut violations = Vec::new();
        let warnings: Vec<String> = Vec::new();
        let mut allows = Vec::new();

        if principal.tenant_id != resource.tenant_id {
            violations.push("abac.tenant_mismatch".to_string());
        } else {
            allows.push("abac.tenant_match".to_string());
        }

        if !principal.allowed_actions.contains(action)
            && !principal.allowed_actions.contains("*")
        {
            violations.push("abac.action_not_allowed".to_string());
        } else {
            allows.push("abac.action_allowed".to_string());
        }

        if environment.requires_mfa && !principal.mfa_present {
            violations.push("abac.mfa_required".to_string());
        } else if environment.requires_mfa {
            allows.push("abac.mfa_satisfied".to_string());
        }

        let decision = if violations.is_empty() {
            Decision::Allow
        } else {
            Decision::Deny
        };

        let evaluated_fields = vec![
            "principal.tenant_id".to_string(),
            "principal.allowed_actions".to_string(),
            "principal.mfa_present".to_string(),
            "resource.tenant_id".to_string(),
            "environment.requires_mfa".to_string(),
            format!("action={action}"),
        ];

        let payload = DecisionPayload {
            decision,
            violation_codes: &violations,
            warning_codes: &warnings,
            allow_codes: &allows,
            evaluated_fields: &evaluated_fields,
            signed_at: now,
        };
        let decision_signature = sign(self.policy_secret.as_bytes(), &canonical(&payload));

        debug!(?decision, ?violations, action, "policy evaluated");
        PolicyDecision {
            decision,
            violation_codes: violations,
            warning_codes: warnings,
            allow_codes: allows,
            evaluated_fields,
            decision_signature,
            signed_at: now,
        }
    }

    /// Recompute the signature over a decision's payload. Deterministic: the
    /// verification of an untampered decision always succeeds with the same
    /// secret.
    pub fn verify_decision(&self, decision: &PolicyDecision) -> bool {
        verify(
            self.policy_secret.as_bytes(),
            &canonical(&decision.payload()),
            &decision.decision_signature,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn evaluator() -> PolicyEvaluator {
        PolicyEvaluator::new(Secret::from_str_value("policy-test-secret"))
    }

    fn principal(tenant: &str, actions: &[&str], mfa: bool) -> PrincipalContext {
        PrincipalContext {
            tenant_id: tenant.to_string(),
            allowed_actions: actions.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            mfa_present: mfa,
        }
    }

    fn resource(tenant: &str) -> ResourceContext {
        ResourceContext {
            tenant_id: tenant.to_string(),
            attributes: Default::default(),
        }
    }

    #[test]
    fn mfa_gap_denies_with_violation_code() {
        let eval = evaluator();
        let decision = eval.evaluate(
            &principal("t1", &["agents.publish"], false),
            &resource("t1"),
            &EnvironmentContext { requires_mfa: true },
            "agents.publish",
            1_000,
        );
        assert_eq!(decision.decision, Decision::Deny);
        assert_eq!(decision.violation_codes, vec!["abac.mfa_required"]);
        assert!(eval.verify_decision(&decision));
    }

    #[test]
    fn tenant_mismatch_and_action_both_reported() {
        let eval = evaluator();
        let decision = eval.evaluate(
            &principal("t1", &["other.action"], true),
            &resource("t2"),
            &EnvironmentContext { requires_mfa: false },
            "agents.publish",
            1_000,
        );
        assert_eq!(decision.decision, Decision::Deny);
        assert_eq!(
            decision.violation_codes,
            vec!["abac.tenant_mismatch", "abac.action_not_allowed"]
        );
    }

    #[test]
    fn clean_request_allows() {
        let eval = evaluator();
        let decision = eval.evaluate(
            &principal("t1", &["agents.publish"], true),
            &resource("t1"),
            &EnvironmentContext { requires_mfa: true },
            "agents.publish",
            1_000,
        );
        assert_eq!(decision.decision, Decision::Allow);
        assert!(decision.violation_codes.is_empty());
        assert!(decision
            .allow_codes
            .contains(&"abac.mfa_satisfied".to_string()));
    }

    #[test]
    fn wildcard_action_list_allows_everything() {
        let eval = evaluator();
        let decision = eval.evaluate(
            &principal("t1", &["*"], true),
            &resource("t1"),
            &EnvironmentContext { requires_mfa: false },
            "anything.whatsoever",
            1_000,
        );
        assert_eq!(decision.decision, Decision::Allow);
    }

    #[test]
    fn identical_inputs_produce_identical_signatures() {
        let eval = evaluator();
        let run = || {
            eval.evaluate(
                &principal("t1", &["agents.publish"], false),
                &resource("t1"),
                &EnvironmentContext { requires_mfa: true },
                "agents.publish",
                5_000,
            )
        };
        let a = run();
        let b = run();
        assert_eq!(a.decision_signature, b.decision_signature);
        assert_eq!(a.violation_codes, b.violation_codes);
    }

    #[test]
    fn tampered_decision_fails_verification() {
        let eval = evaluator();
        let mut decision = eval.evaluate(
            &principal("t1", &["agents.publish"], true),
            &resource("t1"),
            &EnvironmentContext { requires_mfa: false },
            "agents.publish",
            1_000,
        );
        decision.decision = Decision::Deny;
        assert!(!eval.verify_decision(&decision));
    }
}
