//! Rule-based graceful degradation.
//!
//! A service registers named levels, each with a handler, and an ordered
//! list of conditions. The first condition that holds picks the level;
//! when none holds the service runs at [`NORMAL_LEVEL`].

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rampart_core::Context;

use crate::error::ResilienceError;

/// Level of a service with no active condition.
pub const NORMAL_LEVEL: &str = "normal";

/// Behaviour run at a given level.
pub type LevelHandler = Arc<dyn Fn(&Context) -> serde_json::Value + Send + Sync>;

/// Predicate over the evaluation context.
pub type Condition = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Levels and conditions of one service.
///
/// Conditions are checked in insertion order, so add the most severe first.
#[derive(Clone, Default)]
pub struct DegradationRule {
    levels: BTreeMap<String, LevelHandler>,
    conditions: Vec<(String, Condition)>,
}

impl fmt::Debug for DegradationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DegradationRule")
            .field("levels", &self.levels.keys().collect::<Vec<_>>())
            .field(
                "conditions",
                &self.conditions.iter().map(|(l, _)| l).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl DegradationRule {
    /// Rule with no levels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a level and its handler.
    pub fn level<H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: Fn(&Context) -> serde_json::Value + Send + Sync + 'static,
    {
        self.levels.insert(name.into(), Arc::new(handler));
        self
    }

    /// Select `level` when `predicate` holds and no earlier condition did.
    pub fn when<P>(mut self, level: impl Into<String>, predicate: P) -> Self
    where
        P: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.conditions.push((level.into(), Arc::new(predicate)));
        self
    }

    fn select(&self, context: &Context) -> &str {
        self.conditions
            .iter()
            .find(|(_, predicate)| predicate(context))
            .map(|(level, _)| level.as_str())
            .unwrap_or(NORMAL_LEVEL)
    }

    fn has_level(&self, level: &str) -> bool {
        level == NORMAL_LEVEL || self.levels.contains_key(level)
    }
}

struct ServiceDegradation {
    rule: Arc<DegradationRule>,
    current_level: String,
}

/// Snapshot of one service's degradation state.
#[derive(Debug, Clone, Serialize)]
pub struct DegradationStatus {
    pub service: String,
    pub current_level: String,
    pub levels: Vec<String>,
}

/// Picks and runs the behaviour level of each registered service.
#[derive(Default)]
pub struct GracefulDegradationManager {
    services: RwLock<BTreeMap<String, ServiceDegradation>>,
}

impl GracefulDegradationManager {
    /// Create a manager with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a service's rule. The service starts at normal.
    pub fn register_rule(&self, service: impl Into<String>, rule: DegradationRule) {
        let service = service.into();
        tracing::debug!(service = %service, rule = ?rule, "Registered degradation rule");
        self.services.write().insert(
            service,
            ServiceDegradation {
                rule: Arc::new(rule),
                current_level: NORMAL_LEVEL.to_string(),
            },
        );
    }

    fn rule(&self, service: &str) -> Option<Arc<DegradationRule>> {
        self.services
            .read()
            .get(service)
            .map(|s| Arc::clone(&s.rule))
    }

    /// Pick the level for `context`, store it and return it.
    ///
    /// Unregistered services are always at normal.
    pub fn evaluate(&self, service: &str, context: &Context) -> String {
        let Some(rule) = self.rule(service) else {
            return NORMAL_LEVEL.to_string();
        };

        // Predicates run without the lock held
        let level = rule.select(context).to_string();
        self.store_level(service, &level, "condition matched");
        level
    }

    fn store_level(&self, service: &str, level: &str, reason: &str) {
        let mut services = self.services.write();
        let Some(entry) = services.get_mut(service) else {
            return;
        };

        if entry.current_level != level {
            let previous = std::mem::replace(&mut entry.current_level, level.to_string());
            drop(services);
            tracing::info!(
                service = %service,
                from = %previous,
                to = %level,
                reason = %reason,
                "Degradation level changed"
            );
        } else {
            tracing::debug!(service = %service, level = %level, "Degradation level unchanged");
        }
    }

    /// Evaluate the level and run its handler with `args`.
    ///
    /// A selected level without a handler is a configuration error.
    pub fn execute_with_degradation(
        &self,
        service: &str,
        context: &Context,
        args: &Context,
    ) -> Result<serde_json::Value, ResilienceError> {
        let rule = self
            .rule(service)
            .ok_or_else(|| ResilienceError::NotRegistered(service.to_string()))?;

        let level = rule.select(context).to_string();
        self.store_level(service, &level, "condition matched");

        let handler = rule
            .levels
            .get(&level)
            .ok_or_else(|| ResilienceError::MissingHandler {
                service: service.to_string(),
                level: level.clone(),
            })?;

        Ok(handler(args))
    }

    /// Level stored by the last evaluation; normal for unknown services.
    pub fn current_level(&self, service: &str) -> String {
        self.services
            .read()
            .get(service)
            .map(|s| s.current_level.clone())
            .unwrap_or_else(|| NORMAL_LEVEL.to_string())
    }

    /// Operator override of a service's level.
    pub fn set_level(&self, service: &str, level: &str) -> Result<(), ResilienceError> {
        let rule = self
            .rule(service)
            .ok_or_else(|| ResilienceError::NotRegistered(service.to_string()))?;

        if !rule.has_level(level) {
            return Err(ResilienceError::MissingHandler {
                service: service.to_string(),
                level: level.to_string(),
            });
        }

        self.store_level(service, level, "manual override");
        Ok(())
    }

    /// Snapshot of every registered service.
    pub fn status(&self) -> Vec<DegradationStatus> {
        self.services
            .read()
            .iter()
            .map(|(name, s)| DegradationStatus {
                service: name.clone(),
                current_level: s.current_level.clone(),
                levels: s.rule.levels.keys().cloned().collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(load: f64) -> Context {
        let mut ctx = Context::new();
        ctx.insert("load".to_string(), json!(load));
        ctx
    }

    fn load(ctx: &Context) -> f64 {
        ctx.get("load").and_then(|v| v.as_f64()).unwrap_or(0.0)
    }

    fn search_rule() -> DegradationRule {
        DegradationRule::new()
            .level("normal", |_| json!("full results"))
            .level("reduced", |_| json!("cached results"))
            .level("minimal", |args| json!({ "static": args.len() }))
            .when("minimal", |ctx| load(ctx) > 0.9)
            .when("reduced", |ctx| load(ctx) > 0.7)
    }

    #[test]
    fn test_first_matching_condition_wins() {
        let manager = GracefulDegradationManager::new();
        manager.register_rule("search", search_rule());

        assert_eq!(manager.evaluate("search", &context(0.95)), "minimal");
        assert_eq!(manager.evaluate("search", &context(0.8)), "reduced");
        assert_eq!(manager.evaluate("search", &context(0.1)), "normal");
        assert_eq!(manager.current_level("search"), "normal");
    }

    #[test]
    fn test_execute_runs_level_handler() {
        let manager = GracefulDegradationManager::new();
        manager.register_rule("search", search_rule());

        let out = manager
            .execute_with_degradation("search", &context(0.8), &Context::new())
            .unwrap();
        assert_eq!(out, json!("cached results"));
        assert_eq!(manager.current_level("search"), "reduced");

        let out = manager
            .execute_with_degradation("search", &context(0.99), &context(1.0))
            .unwrap();
        assert_eq!(out, json!({ "static": 1 }));
    }

    #[test]
    fn test_missing_handler_fails_loudly() {
        let manager = GracefulDegradationManager::new();
        manager.register_rule(
            "feed",
            DegradationRule::new()
                .level("normal", |_| json!("ok"))
                .when("offline", |_| true),
        );

        let err = manager
            .execute_with_degradation("feed", &Context::new(), &Context::new())
            .unwrap_err();
        assert!(matches!(err, ResilienceError::MissingHandler { ref level, .. } if level == "offline"));
    }

    #[test]
    fn test_unregistered_service() {
        let manager = GracefulDegradationManager::new();

        assert_eq!(manager.evaluate("ghost", &context(1.0)), "normal");
        assert!(matches!(
            manager.execute_with_degradation("ghost", &Context::new(), &Context::new()),
            Err(ResilienceError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_set_level_override() {
        let manager = GracefulDegradationManager::new();
        manager.register_rule("search", search_rule());

        manager.set_level("search", "minimal").unwrap();
        assert_eq!(manager.current_level("search"), "minimal");
        assert!(manager.set_level("search", "bogus").is_err());

        let status = manager.status();
        assert_eq!(status[0].current_level, "minimal");
        assert_eq!(status[0].levels, vec!["minimal", "normal", "reduced"]);
    }
}
