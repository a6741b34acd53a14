//! Status scripts for simulated objects

use std::collections::VecDeque;

use lbstate_core::status::{ACTIVE, PENDING_CREATE, PENDING_DELETE, PENDING_UPDATE};
use serde::{Deserialize, Serialize};

/// What an object does once its scripted steps run out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Settle {
    /// Report this status forever
    Hold(String),
    /// Disappear; later reads return `NotFound`
    Vanish,
}

/// Sequence of provisioning statuses reported by one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusScript {
    #[serde(default)]
    pub steps: VecDeque<String>,
    pub then: Settle,
}

impl StatusScript {
    pub fn new<I, S>(steps: I, then: Settle) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
            then,
        }
    }

    /// Always report `status`
    pub fn hold(status: impl Into<String>) -> Self {
        Self::new(Vec::<String>::new(), Settle::Hold(status.into()))
    }

    /// Report `steps` in order, then hold the last one
    pub fn sequence<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut steps: VecDeque<String> = steps.into_iter().map(Into::into).collect();
        let last = steps.pop_back().unwrap_or_default();
        Self {
            steps,
            then: Settle::Hold(last),
        }
    }

    pub fn creating() -> Self {
        Self::new([PENDING_CREATE], Settle::Hold(ACTIVE.to_string()))
    }

    pub fn updating() -> Self {
        Self::new([PENDING_UPDATE], Settle::Hold(ACTIVE.to_string()))
    }

    pub fn deleting() -> Self {
        Self::new([PENDING_DELETE], Settle::Vanish)
    }

    /// Status the next observation would report, without consuming it
    pub fn peek(&self) -> Option<&str> {
        match self.steps.front() {
            Some(step) => Some(step.as_str()),
            None => match &self.then {
                Settle::Hold(status) => Some(status.as_str()),
                Settle::Vanish => None,
            },
        }
    }

    /// Report the next status; `None` once a vanishing object is gone
    pub fn observe(&mut self) -> Option<String> {
        match self.steps.pop_front() {
            Some(step) => Some(step),
            None => match &self.then {
                Settle::Hold(status) => Some(status.clone()),
                Settle::Vanish => None,
            },
        }
    }
}
