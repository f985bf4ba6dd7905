use ssm_manager::tabular;
use ssm_manager::{
    sync, AlwaysOverwrite, AlwaysSkip, AuthConfig, ClientConfig, ConflictDecision, Error, Interactive, MemoryStore,
    ParameterClient, ParameterRecord, ParameterType, RemoteParameter, Resolver, RetryPolicy, StoreError, SyncAction,
};

fn resolver() -> Resolver {
    Resolver::new(Some("us-east-1"))
}

fn auth() -> AuthConfig {
    AuthConfig::AccessKey {
        access_key_id: "AKIDEXAMPLE".into(),
        secret_access_key: "secret".into(),
        session_token: None,
        region: Some("eu-central-1".into()),
    }
}

fn client<'r>(resolver: &'r Resolver, store: &MemoryStore) -> ParameterClient<'r, MemoryStore> {
    let config = ClientConfig::default().with_retry(RetryPolicy::none());
    ParameterClient::connect(resolver, auth(), store.clone(), config).unwrap()
}

fn rows(csv: &str) -> Vec<ParameterRecord> {
    tabular::parse(csv.as_bytes()).unwrap()
}

const INPUT: &str = "key,value,type,tier,kms\n\
    /app/db/host,db.internal,String,,\n\
    /app/db/password,hunter2,SecureString,,alias/app\n\
    /app/hosts,a.example.com;b.example.com,StringList,Advanced,\n";

#[test]
fn second_run_updates_or_skips_everything() {
    let resolver = resolver();
    let store = MemoryStore::new();
    let mut client = client(&resolver, &store);

    let first = sync(&mut client, rows(INPUT), &mut AlwaysOverwrite).unwrap();
    assert_eq!(first.count(SyncAction::Created), 3);

    let second = sync(&mut client, rows(INPUT), &mut AlwaysOverwrite).unwrap();
    assert_eq!(second.count(SyncAction::Updated), 3);

    let third = sync(&mut client, rows(INPUT), &mut AlwaysSkip).unwrap();
    assert_eq!(third.count(SyncAction::Skipped), 3);
    assert!(!third.has_failures());
}

#[test]
fn last_duplicate_wins() {
    let resolver = resolver();
    let store = MemoryStore::new();
    let mut client = client(&resolver, &store);

    let report = sync(
        &mut client,
        rows("key,value,type\n/app/a,1,String\n/app/a,2,String\n"),
        &mut AlwaysOverwrite,
    )
    .unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report.outcomes[0].key, "/app/a");
    assert_eq!(report.outcomes[0].action, SyncAction::Created);
    assert_eq!(client.get("/app/a", true).unwrap().value, "2");
}

#[test]
fn denied_record_does_not_affect_the_rest() {
    let resolver = resolver();
    let store = MemoryStore::new();
    store.deny("/app/db/password");
    let mut client = client(&resolver, &store);

    let report = sync(&mut client, rows(INPUT), &mut AlwaysOverwrite).unwrap();
    let actions: Vec<SyncAction> = report.outcomes.iter().map(|o| o.action).collect();
    assert_eq!(actions, vec![SyncAction::Created, SyncAction::Failed, SyncAction::Created]);
    assert!(matches!(report.outcomes[1].error, Some(StoreError::AccessDenied { .. })));
    assert_eq!(store.value_of("/app/hosts").as_deref(), Some("a.example.com,b.example.com"));
}

#[test]
fn abort_at_k_reports_k_outcomes() {
    let resolver = resolver();
    let store = MemoryStore::new();
    let mut client = client(&resolver, &store);
    sync(&mut client, rows("key,value,type\n/app/hosts,x,StringList\n"), &mut AlwaysOverwrite).unwrap();

    let mut asked = 0;
    let mut policy = Interactive::new(|_: &str, _: &RemoteParameter, _: &ParameterRecord| {
        asked += 1;
        ConflictDecision::Abort
    });
    let err = sync(&mut client, rows(INPUT), &mut policy).unwrap_err();
    let partial = match err {
        Error::BatchAborted(report) => report,
        other => panic!("unexpected error: {}", other),
    };
    assert_eq!(partial.len(), 2);
    assert_eq!(asked, 1);
}

#[test]
fn exported_state_reimports_as_all_skipped() {
    let resolver = resolver();
    let store = MemoryStore::new();
    let mut client = client(&resolver, &store);
    sync(&mut client, rows(INPUT), &mut AlwaysOverwrite).unwrap();

    let live: Vec<RemoteParameter> = client.list_all(true).collect::<Result<_, _>>().unwrap();
    let mut csv = Vec::new();
    assert_eq!(tabular::export(&live, &mut csv).unwrap(), 3);

    let reimported = tabular::parse(csv.as_slice()).unwrap();
    let hosts = reimported.iter().find(|r| r.key == "/app/hosts").unwrap();
    assert_eq!(hosts.value, "a.example.com;b.example.com");
    let password = reimported.iter().find(|r| r.key == "/app/db/password").unwrap();
    assert_eq!(password.kms_key_id.as_deref(), Some("alias/app"));

    let writes = store.writes();
    let report = sync(&mut client, reimported, &mut AlwaysSkip).unwrap();
    assert_eq!(report.count(SyncAction::Skipped), 3);
    assert_eq!(report.count(SyncAction::Created) + report.count(SyncAction::Updated), 0);
    assert_eq!(store.writes(), writes);
}

#[test]
fn kms_key_on_string_is_rejected() {
    let resolver = resolver();
    let store = MemoryStore::new();
    let mut client = client(&resolver, &store);
    let record = ParameterRecord::new("/app/plain", "v", ParameterType::String).with_kms_key("alias/app");

    match client.put(&record, false) {
        Err(Error::Store(StoreError::Validation { key, .. })) => assert_eq!(key, "/app/plain"),
        other => panic!("unexpected result: {:?}", other.err().map(|e| e.to_string())),
    }
    assert!(store.is_empty());
}

#[test]
fn duplicate_rows_against_empty_store() {
    let resolver = resolver();
    let store = MemoryStore::new();
    let mut client = client(&resolver, &store);
    let records = vec![
        ParameterRecord::new("/app/a", "1", ParameterType::String),
        ParameterRecord::new("/app/a", "2", ParameterType::String),
    ];

    let report = sync(&mut client, records, &mut AlwaysOverwrite).unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report.outcomes[0].action, SyncAction::Created);
    assert_eq!(store.value_of("/app/a").as_deref(), Some("2"));
}

#[test]
fn session_region_comes_from_the_config() {
    let resolver = resolver();
    let store = MemoryStore::new();
    let client = client(&resolver, &store);
    assert_eq!(client.session().region(), "eu-central-1");
}

#[test]
fn malformed_input_fails_before_any_store_call() {
    let store = MemoryStore::new();
    let err = tabular::parse("key,value,type\n/app/a,1,String\n/app/b,,String\n".as_bytes()).unwrap_err();
    assert_eq!(err.to_string(), "Malformed row 3: missing value for /app/b");
    assert_eq!(store.reads(), 0);
}
