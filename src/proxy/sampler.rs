//! Per-request shadowing decision
//!
//! The sampler holds only immutable configuration. Each decision draws from
//! the calling thread's RNG, so concurrent requests never contend on it.

use crate::proxy::types::SampleRate;
use http::Method;
use rand::Rng;
use std::collections::HashSet;
use std::fmt;

/// Why a request was or was not selected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplingDecision {
    Selected,
    NotSelected,
    /// Mutating methods are never shadowed, whatever the rate
    ExcludedMethod,
}

impl SamplingDecision {
    pub fn is_selected(&self) -> bool {
        matches!(self, Self::Selected)
    }
}

impl fmt::Display for SamplingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Selected => "selected",
            Self::NotSelected => "not-selected",
            Self::ExcludedMethod => "sampling-excluded",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug)]
pub struct Sampler {
    sample_rate: SampleRate,
    excluded_methods: HashSet<Method>,
}

impl Sampler {
    pub fn new(sample_rate: SampleRate, excluded_methods: HashSet<Method>) -> Self {
        Self {
            sample_rate,
            excluded_methods,
        }
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    pub fn should_shadow(&self, method: &Method) -> bool {
        self.decide(method).is_selected()
    }

    pub fn decide(&self, method: &Method) -> SamplingDecision {
        self.decide_with(method, &mut rand::thread_rng())
    }

    /// Decide using a caller-supplied random source; one draw per call
    pub fn decide_with<R: Rng + ?Sized>(&self, method: &Method, rng: &mut R) -> SamplingDecision {
        if self.excluded_methods.contains(method) {
            return SamplingDecision::ExcludedMethod;
        }

        // gen::<f64>() is in [0, 1): rate 0 never passes, rate 1 always does
        let draw: f64 = rng.gen();
        if draw < self.sample_rate.into_inner() {
            SamplingDecision::Selected
        } else {
            SamplingDecision::NotSelected
        }
    }
}
