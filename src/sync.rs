//! Bulk sync: dedupe, diff against live state, ask the conflict policy, apply.
//!
//! Records are handled strictly one after another. A failed write only marks its own
//! outcome; the batch stops early only on an `Abort` decision, cancellation, or an
//! authentication failure.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::client::{is_not_found, ParameterClient};
use crate::conflict::{ConflictDecision, ConflictPolicy};
use crate::error::{Error, Result, StoreError};
use crate::ssm_parameters::{ParameterRecord, RemoteParameter};
use crate::store::Connect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncAction {
    Created,
    Updated,
    Skipped,
    Failed,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SyncAction::Created => "created",
            SyncAction::Updated => "updated",
            SyncAction::Skipped => "skipped",
            SyncAction::Failed => "failed",
        };
        f.pad(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub key: String,
    pub action: SyncAction,
    /// Set exactly when `action` is `Failed`.
    pub error: Option<StoreError>,
}

impl SyncOutcome {
    fn done(key: &str, action: SyncAction) -> Self {
        SyncOutcome { key: key.to_string(), action, error: None }
    }

    fn failed(key: &str, error: StoreError) -> Self {
        SyncOutcome { key: key.to_string(), action: SyncAction::Failed, error: Some(error) }
    }
}

/// Outcomes of one batch, in processing order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub outcomes: Vec<SyncOutcome>,
}

impl SyncReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn count(&self, action: SyncAction) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SyncOutcome> {
        self.outcomes.iter().filter(|o| o.action == SyncAction::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn outcome(&self, key: &str) -> Option<&SyncOutcome> {
        self.outcomes.iter().find(|o| o.key == key)
    }

    fn push(&mut self, outcome: SyncOutcome) {
        match &outcome.error {
            Some(err) => warn!(key = %outcome.key, kind = err.kind(), "failed: {}", err),
            None => info!(key = %outcome.key, action = %outcome.action, "synced"),
        }
        self.outcomes.push(outcome);
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} skipped, {} failed",
            self.count(SyncAction::Created),
            self.count(SyncAction::Updated),
            self.count(SyncAction::Skipped),
            self.count(SyncAction::Failed)
        )
    }
}

/// Shared stop switch for a running batch, e.g. flipped from a Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Keeps one record per key: the last one. Each survivor stays where its last occurrence was.
pub fn dedupe_last_wins(records: Vec<ParameterRecord>) -> Vec<ParameterRecord> {
    let mut seen = HashSet::new();
    let mut kept: Vec<ParameterRecord> = records.into_iter().rev().filter(|r| seen.insert(r.key.clone())).collect();
    kept.reverse();
    kept
}

pub struct SyncEngine<'c, 'r, C: Connect> {
    client: &'c mut ParameterClient<'r, C>,
    cancel: Option<CancelFlag>,
}

enum Step {
    Continue,
    Abort,
}

impl<'c, 'r, C: Connect> SyncEngine<'c, 'r, C> {
    pub fn new(client: &'c mut ParameterClient<'r, C>) -> Self {
        SyncEngine { client, cancel: None }
    }

    pub fn cancel_on(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, CancelFlag::is_cancelled)
    }

    /// Runs the batch. `BatchAborted` and `Cancelled` carry the outcomes produced so far.
    pub fn run<P>(&mut self, records: Vec<ParameterRecord>, policy: &mut P) -> Result<SyncReport>
    where
        P: ConflictPolicy + ?Sized,
    {
        let total = records.len();
        let records = dedupe_last_wins(records);
        if records.len() < total {
            info!(duplicates = total - records.len(), "duplicate keys collapsed, last occurrence wins");
        }

        let mut report = SyncReport::default();
        for record in &records {
            if self.cancelled() {
                warn!(processed = report.len(), "batch cancelled");
                return Err(Error::Cancelled(report));
            }
            match self.apply(record, policy, &mut report) {
                Ok(Step::Continue) => {}
                Ok(Step::Abort) => {
                    warn!(key = %record.key, processed = report.len(), "batch aborted");
                    return Err(Error::BatchAborted(report));
                }
                Err(Error::Cancelled(_)) => {
                    warn!(processed = report.len(), "batch cancelled");
                    return Err(Error::Cancelled(report));
                }
                Err(err) => return Err(err),
            }
        }
        info!("sync finished: {}", report);
        Ok(report)
    }

    fn apply<P>(&mut self, record: &ParameterRecord, policy: &mut P, report: &mut SyncReport) -> Result<Step>
    where
        P: ConflictPolicy + ?Sized,
    {
        if let Err(message) = record.validate() {
            report.push(SyncOutcome::failed(&record.key, StoreError::Validation { key: record.key.clone(), message }));
            return Ok(Step::Continue);
        }

        let existing = match self.fetch_existing(&record.key) {
            Ok(existing) => existing,
            Err(Error::Store(err)) => {
                report.push(SyncOutcome::failed(&record.key, err));
                return Ok(Step::Continue);
            }
            Err(err) => return Err(err),
        };

        let (overwrite, action) = match existing {
            None => (false, SyncAction::Created),
            Some(existing) => match policy.decide(&record.key, &existing, record) {
                ConflictDecision::Overwrite => (true, SyncAction::Updated),
                ConflictDecision::Skip => {
                    report.push(SyncOutcome::done(&record.key, SyncAction::Skipped));
                    return Ok(Step::Continue);
                }
                ConflictDecision::Abort => return Ok(Step::Abort),
            },
        };

        if self.cancelled() {
            return Err(Error::Cancelled(SyncReport::default()));
        }
        match self.client.put(record, overwrite) {
            Ok(()) => report.push(SyncOutcome::done(&record.key, action)),
            Err(Error::Store(err)) => report.push(SyncOutcome::failed(&record.key, err)),
            Err(err) => return Err(err),
        }
        Ok(Step::Continue)
    }

    /// Current remote state of `key`, `None` when absent. Falls back to an undecrypted read
    /// when the caller may not decrypt, since only presence matters for the diff.
    fn fetch_existing(&mut self, key: &str) -> Result<Option<RemoteParameter>> {
        match self.client.get(key, true) {
            Ok(param) => Ok(Some(param)),
            Err(ref err) if is_not_found(err) => Ok(None),
            Err(Error::Store(StoreError::KmsDecryptDenied { .. })) => self.client.get(key, false).map(Some),
            Err(err) => Err(err),
        }
    }
}

/// Convenience wrapper for a batch without cancellation.
pub fn sync<C, P>(client: &mut ParameterClient<C>, records: Vec<ParameterRecord>, policy: &mut P) -> Result<SyncReport>
where
    C: Connect,
    P: ConflictPolicy + ?Sized,
{
    SyncEngine::new(client).run(records, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthConfig, Resolver};
    use crate::config::{ClientConfig, RetryPolicy};
    use crate::conflict::{AlwaysOverwrite, AlwaysSkip, Interactive};
    use crate::memory_store::MemoryStore;
    use crate::ssm_parameters::ParameterType;

    fn resolver() -> Resolver {
        Resolver::new(Some("us-east-1"))
    }

    fn auth() -> AuthConfig {
        AuthConfig::AccessKey {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "secret".into(),
            session_token: None,
            region: Some("us-east-1".into()),
        }
    }

    fn client<'r>(resolver: &'r Resolver, store: &MemoryStore) -> ParameterClient<'r, MemoryStore> {
        let config = ClientConfig::default().with_retry(RetryPolicy::none());
        ParameterClient::connect(resolver, auth(), store.clone(), config).unwrap()
    }

    fn record(key: &str, value: &str) -> ParameterRecord {
        ParameterRecord::new(key, value, ParameterType::String)
    }

    #[test]
    fn dedupe_keeps_last_occurrence_in_its_position() {
        let records = vec![record("/a", "1"), record("/b", "x"), record("/a", "2"), record("/c", "y")];
        let kept = dedupe_last_wins(records);
        let keys: Vec<(&str, &str)> = kept.iter().map(|r| (r.key.as_str(), r.value.as_str())).collect();
        assert_eq!(keys, vec![("/b", "x"), ("/a", "2"), ("/c", "y")]);
    }

    #[test]
    fn creates_then_updates() {
        let resolver = resolver();
        let store = MemoryStore::new();
        let mut client = client(&resolver, &store);
        let records = vec![record("/app/a", "1"), record("/app/b", "2")];

        let first = sync(&mut client, records.clone(), &mut AlwaysOverwrite).unwrap();
        assert_eq!(first.count(SyncAction::Created), 2);

        let second = sync(&mut client, records, &mut AlwaysOverwrite).unwrap();
        assert_eq!(second.count(SyncAction::Updated), 2);
        assert_eq!(second.to_string(), "0 created, 2 updated, 0 skipped, 0 failed");
    }

    #[test]
    fn skip_makes_no_writes() {
        let resolver = resolver();
        let store = MemoryStore::new();
        let mut client = client(&resolver, &store);
        sync(&mut client, vec![record("/app/a", "1")], &mut AlwaysOverwrite).unwrap();
        let writes = store.writes();

        let report = sync(&mut client, vec![record("/app/a", "changed")], &mut AlwaysSkip).unwrap();
        assert_eq!(report.count(SyncAction::Skipped), 1);
        assert_eq!(store.writes(), writes);
        assert_eq!(store.value_of("/app/a").as_deref(), Some("1"));
    }

    #[test]
    fn failures_are_contained() {
        let resolver = resolver();
        let store = MemoryStore::new();
        store.deny("/app/b");
        let mut client = client(&resolver, &store);
        let records = vec![record("/app/a", "1"), record("/app/b", "2"), record("/app/c", "3")];

        let report = sync(&mut client, records, &mut AlwaysOverwrite).unwrap();
        assert_eq!(report.len(), 3);
        assert_eq!(report.count(SyncAction::Created), 2);
        let failed = report.outcome("/app/b").unwrap();
        assert_eq!(failed.action, SyncAction::Failed);
        assert_eq!(failed.error.as_ref().map(StoreError::kind), Some("AccessDenied"));
        assert!(report.has_failures());
    }

    #[test]
    fn kms_key_on_plain_string_fails_without_a_network_call() {
        let resolver = resolver();
        let store = MemoryStore::new();
        let mut client = client(&resolver, &store);
        let bad = record("/app/a", "1").with_kms_key("alias/custom");

        let report = sync(&mut client, vec![bad], &mut AlwaysOverwrite).unwrap();
        assert_eq!(report.outcomes[0].error.as_ref().map(StoreError::kind), Some("ValidationError"));
        assert_eq!(store.reads(), 0);
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn abort_returns_partial_report() {
        let resolver = resolver();
        let store = MemoryStore::new();
        let mut client = client(&resolver, &store);
        sync(&mut client, vec![record("/app/b", "old")], &mut AlwaysOverwrite).unwrap();

        let mut policy = Interactive::new(|_: &str, _: &RemoteParameter, _: &ParameterRecord| ConflictDecision::Abort);
        let records = vec![record("/app/a", "1"), record("/app/b", "2"), record("/app/c", "3")];
        let err = sync(&mut client, records, &mut policy).unwrap_err();
        match err {
            Error::BatchAborted(report) => {
                assert_eq!(report.len(), 1);
                assert_eq!(report.outcomes[0].key, "/app/a");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(store.value_of("/app/c").is_none());
        assert_eq!(store.value_of("/app/b").as_deref(), Some("old"));
    }

    #[test]
    fn cancellation_stops_before_next_write() {
        let resolver = resolver();
        let store = MemoryStore::new();
        let mut client = client(&resolver, &store);
        sync(&mut client, vec![record("/app/b", "old")], &mut AlwaysOverwrite).unwrap();

        let flag = CancelFlag::new();
        let trigger = flag.clone();
        let mut policy = Interactive::new(move |_: &str, _: &RemoteParameter, _: &ParameterRecord| {
            trigger.cancel();
            ConflictDecision::Overwrite
        });
        let records = vec![record("/app/a", "1"), record("/app/b", "2"), record("/app/c", "3")];
        let err = SyncEngine::new(&mut client).cancel_on(flag).run(records, &mut policy).unwrap_err();
        let report = err.partial_report().cloned().unwrap();
        assert!(matches!(err, Error::Cancelled(_)));
        assert_eq!(report.len(), 1);
        assert_eq!(store.value_of("/app/b").as_deref(), Some("old"));
        assert!(store.value_of("/app/c").is_none());
    }

    #[test]
    fn undecryptable_existing_values_still_count_as_present() {
        let resolver = resolver();
        let store = MemoryStore::new();
        let mut client = client(&resolver, &store);
        let secret = ParameterRecord::new("/app/secret", "v1", ParameterType::SecureString);
        sync(&mut client, vec![secret.clone()], &mut AlwaysOverwrite).unwrap();
        store.deny_decrypt("/app/secret");

        let report = sync(&mut client, vec![secret], &mut AlwaysSkip).unwrap();
        assert_eq!(report.outcomes[0].action, SyncAction::Skipped);
    }
}
