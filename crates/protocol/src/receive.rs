//! Per-pipe polling configuration.

use serde::{Deserialize, Serialize};

/// How a pipe polls its step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveOptions {
    /// Step this pipe receives for. Fixed for the lifetime of the pipe.
    pub step: String,
    /// Acknowledge delivery on the service side as part of the fetch.
    pub auto_ack: bool,
    /// Hold the fetch open until at least one event is available.
    pub block: bool,
    /// Omit routing metadata from fetched events.
    pub exclude_routing: bool,
    /// Omit the route log from fetched events.
    pub exclude_route_log: bool,
    /// Omit the decorated payload from fetched events.
    pub exclude_decorated_payload: bool,
    /// Target buffer size; also the per-fetch batch size.
    pub count: u32,
    /// Long-poll timeout in seconds. Zero means the service default (60).
    pub timeout: u64,
    /// Seconds before an unfinished delivery is redelivered. Zero disables
    /// automatic redelivery.
    pub redelivery_timeout: u64,
}

impl ReceiveOptions {
    #[must_use]
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            auto_ack: false,
            block: false,
            exclude_routing: false,
            exclude_route_log: false,
            exclude_decorated_payload: false,
            count: 1,
            timeout: 0,
            redelivery_timeout: 0,
        }
    }

    /// Profile used by workers: larger batches, a long poll, and
    /// redelivery after two minutes.
    #[must_use]
    pub fn worker(step: impl Into<String>) -> Self {
        Self {
            count: 10,
            timeout: 60,
            redelivery_timeout: 120,
            ..Self::new(step)
        }
    }

    /// Apply a patch, keeping every field the patch leaves unset.
    pub fn apply(&mut self, patch: ReceiveOptionsPatch) {
        if let Some(auto_ack) = patch.auto_ack {
            self.auto_ack = auto_ack;
        }
        if let Some(block) = patch.block {
            self.block = block;
        }
        if let Some(exclude_routing) = patch.exclude_routing {
            self.exclude_routing = exclude_routing;
        }
        if let Some(exclude_route_log) = patch.exclude_route_log {
            self.exclude_route_log = exclude_route_log;
        }
        if let Some(exclude_decorated_payload) = patch.exclude_decorated_payload {
            self.exclude_decorated_payload = exclude_decorated_payload;
        }
        if let Some(count) = patch.count {
            self.count = count;
        }
        if let Some(timeout) = patch.timeout {
            self.timeout = timeout;
        }
        if let Some(redelivery_timeout) = patch.redelivery_timeout {
            self.redelivery_timeout = redelivery_timeout;
        }
    }
}

/// Partial update for [`ReceiveOptions`]. Carries no step field, so the
/// step a pipe was built for can never be patched away.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveOptionsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_ack: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_routing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_route_log: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_decorated_payload: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redelivery_timeout: Option<u64>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_start_conservative() {
        let options = ReceiveOptions::new("ingest");
        assert_eq!(options.step, "ingest");
        assert!(!options.auto_ack);
        assert!(!options.block);
        assert_eq!(options.count, 1);
        assert_eq!(options.timeout, 0);
        assert_eq!(options.redelivery_timeout, 0);
    }

    #[test]
    fn worker_profile_batches_and_redelivers() {
        let options = ReceiveOptions::worker("enrich");
        assert_eq!(options.count, 10);
        assert_eq!(options.timeout, 60);
        assert_eq!(options.redelivery_timeout, 120);
        assert!(!options.auto_ack);
    }

    #[test]
    fn patch_touches_only_named_fields() {
        let mut options = ReceiveOptions::new("ingest");
        options.apply(ReceiveOptionsPatch {
            auto_ack: Some(true),
            count: Some(5),
            ..Default::default()
        });

        assert_eq!(options.step, "ingest");
        assert!(options.auto_ack);
        assert!(!options.block);
        assert_eq!(options.count, 5);
        assert_eq!(options.timeout, 0);
        assert_eq!(options.redelivery_timeout, 0);
    }

    #[test]
    fn patch_applies_cumulatively() {
        let mut options = ReceiveOptions::new("ingest");
        options.apply(ReceiveOptionsPatch {
            block: Some(true),
            ..Default::default()
        });
        options.apply(ReceiveOptionsPatch {
            timeout: Some(30),
            ..Default::default()
        });

        assert!(options.block);
        assert_eq!(options.timeout, 30);
    }
}
