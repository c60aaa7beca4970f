//! Bridge timing and capacity configuration.

use std::time::Duration;

use action_primitives::action_budget;
use flow_model::{ActionSettings, PageAction};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Deadline for control requests (ping, attach, navigate ack, current URL)
    pub request_timeout_ms: u64,
    /// Floor for the deadline of a page action, which may poll for many seconds
    pub action_timeout_ms: u64,
    /// Slack added to an action's own budget before the request is abandoned
    pub action_margin_ms: u64,
    pub queue_capacity: usize,
    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            action_timeout_ms: 300_000,
            action_margin_ms: 10_000,
            queue_capacity: 32,
            event_capacity: 64,
        }
    }
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    /// Deadline for one action: its own budget plus margin, never below the floor.
    pub fn action_deadline(&self, action: &PageAction, settings: &ActionSettings) -> Duration {
        let budget = action_budget(action, settings) + Duration::from_millis(self.action_margin_ms);
        budget.max(self.action_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_model::{CheckConditionStep, ClickStep, ConditionMode};

    #[test]
    fn long_conditions_extend_the_deadline() {
        let config = BridgeConfig::default();
        let settings = ActionSettings::default();
        let click = PageAction::Click(ClickStep {
            selector: "#go".into(),
            force_click: false,
        });
        assert_eq!(config.action_deadline(&click, &settings), config.action_timeout());

        let condition = PageAction::CheckCondition(CheckConditionStep {
            selector: "#missing".into(),
            mode: ConditionMode::Exists,
            timeout_ms: 400_000,
        });
        assert_eq!(
            config.action_deadline(&condition, &settings),
            Duration::from_millis(410_000)
        );
    }
}
