//! What to do when an incoming record targets a key that already exists remotely.

use crate::ssm_parameters::{ParameterRecord, RemoteParameter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Write the incoming record over the existing parameter.
    Overwrite,
    /// Leave the existing parameter untouched.
    Skip,
    /// Stop the whole batch.
    Abort,
}

/// Consulted once per colliding key. Implementations may block (e.g. on a prompt); the
/// engine waits for the answer before moving on.
pub trait ConflictPolicy {
    fn decide(&mut self, key: &str, existing: &RemoteParameter, incoming: &ParameterRecord) -> ConflictDecision;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOverwrite;

impl ConflictPolicy for AlwaysOverwrite {
    fn decide(&mut self, _key: &str, _existing: &RemoteParameter, _incoming: &ParameterRecord) -> ConflictDecision {
        ConflictDecision::Overwrite
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSkip;

impl ConflictPolicy for AlwaysSkip {
    fn decide(&mut self, _key: &str, _existing: &RemoteParameter, _incoming: &ParameterRecord) -> ConflictDecision {
        ConflictDecision::Skip
    }
}

/// Hands every decision to a callback, typically a terminal prompt.
pub struct Interactive<F> {
    ask: F,
}

impl<F> Interactive<F>
where
    F: FnMut(&str, &RemoteParameter, &ParameterRecord) -> ConflictDecision,
{
    pub fn new(ask: F) -> Self {
        Interactive { ask }
    }
}

impl<F> ConflictPolicy for Interactive<F>
where
    F: FnMut(&str, &RemoteParameter, &ParameterRecord) -> ConflictDecision,
{
    fn decide(&mut self, key: &str, existing: &RemoteParameter, incoming: &ParameterRecord) -> ConflictDecision {
        (self.ask)(key, existing, incoming)
    }
}

impl<P: ConflictPolicy + ?Sized> ConflictPolicy for Box<P> {
    fn decide(&mut self, key: &str, existing: &RemoteParameter, incoming: &ParameterRecord) -> ConflictDecision {
        (**self).decide(key, existing, incoming)
    }
}

/// Reads a y/n/q answer. Anything unrecognised yields `None` so the caller can ask again.
pub fn parse_answer(answer: &str) -> Option<ConflictDecision> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(ConflictDecision::Overwrite),
        "n" | "no" => Some(ConflictDecision::Skip),
        "q" | "quit" => Some(ConflictDecision::Abort),
        _ => None,
    }
}
