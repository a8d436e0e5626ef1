//! End-to-end lifecycle tests against the in-memory cluster.

use std::sync::Arc;
use std::time::Duration;

use kube_crd_provider::testing::{
    assert_error_at, assert_plan_no_changes, assert_plan_replaces, assert_plan_updates_in_place,
    FakeApplyClient, ProviderTester,
};
use kube_crd_provider::{
    ApplyClient, ApplyOptions, Catalog, CrdProvider, DeletionPropagation, GroupVersionResource,
    ProviderError, ProviderService, ResourceIdentity,
};
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

const CERT: &str = "k8s_cert_manager_io_certificate_v1";

fn gvr() -> GroupVersionResource {
    GroupVersionResource::new("cert-manager.io", "v1", "certificates")
}

fn web() -> ResourceIdentity {
    ResourceIdentity::new("default", "web")
}

fn certificate(name: &str, secret: &str) -> Value {
    json!({
        "metadata": {"name": name, "namespace": "default", "labels": {"app": name}},
        "spec": {
            "secretName": secret,
            "issuerRef": {"name": "letsencrypt", "kind": "ClusterIssuer"}
        }
    })
}

async fn tester() -> (ProviderTester<CrdProvider>, FakeApplyClient) {
    let fake = FakeApplyClient::new();
    let provider = CrdProvider::with_client(Catalog::builtin(), Arc::new(fake.clone()));
    let tester = ProviderTester::new(provider);
    assert_ok!(tester.configure(json!({"field_manager": "platform"})).await);
    (tester, fake)
}

#[tokio::test]
async fn test_create_update_delete() {
    let (tester, fake) = tester().await;

    let created = assert_ok!(tester.lifecycle_create(CERT, certificate("web", "web-tls")).await);
    assert_eq!(created["id"], "default/web");
    assert_eq!(created["spec"]["issuerRef"]["kind"], "ClusterIssuer");
    assert_eq!(
        fake.field_owner(&gvr(), &web(), &["spec", "secretName"]),
        Some("platform".to_string())
    );

    let mut proposed = certificate("web", "web-tls-2");
    proposed["spec"]["dnsNames"] = json!(["web.example.com"]);
    let plan = assert_ok!(tester.plan_update(CERT, created.clone(), proposed.clone()).await);
    assert_plan_updates_in_place(&plan);

    let updated = assert_ok!(tester.lifecycle_update(CERT, created, proposed).await);
    assert_eq!(updated["spec"]["secretName"], "web-tls-2");
    assert_eq!(updated["spec"]["dnsNames"], json!(["web.example.com"]));

    let object = fake.object(&gvr(), &web()).unwrap();
    assert_eq!(object["apiVersion"], "cert-manager.io/v1");
    assert_eq!(object["kind"], "Certificate");

    assert_ok!(tester.lifecycle_delete(CERT, updated).await);
    assert!(!fake.contains(&gvr(), &web()));
}

#[tokio::test]
async fn test_read_after_create_plans_no_changes() {
    let (tester, _) = tester().await;
    let created = assert_ok!(tester.lifecycle_create(CERT, certificate("web", "web-tls")).await);

    let plan = assert_ok!(tester.plan_update(CERT, created, certificate("web", "web-tls")).await);
    assert_plan_no_changes(&plan);
}

#[tokio::test]
async fn test_renaming_requires_replacement() {
    let (tester, fake) = tester().await;
    let created = assert_ok!(tester.lifecycle_create(CERT, certificate("web", "web-tls")).await);

    let renamed = certificate("api", "web-tls");
    let plan = assert_ok!(tester.plan_update(CERT, created.clone(), renamed.clone()).await);
    assert_plan_replaces(&plan);

    let err = assert_err!(tester.lifecycle_update(CERT, created, renamed).await);
    assert!(matches!(err, ProviderError::Validation(_)));
    assert_eq!(fake.apply_calls(), 1);
}

#[tokio::test]
async fn test_invalid_config_is_reported_per_attribute() {
    let (tester, _) = tester().await;
    let mut config = certificate("Web_Server", "web-tls");
    config["deletion_propagation"] = json!("Cascade");

    let diagnostics = assert_ok!(
        tester
            .provider()
            .validate_resource_config(CERT, config)
            .await
    );
    assert_error_at(&diagnostics, "metadata.name");
    assert_error_at(&diagnostics, "deletion_propagation");
}

#[tokio::test(start_paused = true)]
async fn test_null_wait_bounds_fall_back_to_defaults() {
    let (tester, fake) = tester().await;
    let mut config = certificate("web", "web-tls");
    config["field_manager"] = Value::Null;
    config["wait_for_upsert"] = json!([{
        "jsonpath": ".metadata.name",
        "value": "web",
        "timeout": null,
        "poll_interval": null
    }]);
    config["wait_for_delete"] = json!({"timeout": 0, "poll_interval": null});

    let diagnostics = assert_ok!(
        tester
            .provider()
            .validate_resource_config(CERT, config.clone())
            .await
    );
    assert!(diagnostics.is_empty());

    let mut state = assert_ok!(tester.create(CERT, config).await);
    assert_eq!(state["wait_for_upsert"][0]["timeout"], 30);
    assert_eq!(state["wait_for_upsert"][0]["poll_interval"], 5);
    assert_eq!(fake.get_calls(), 1);

    state["wait_for_delete"] = json!({"timeout": 0, "poll_interval": null});
    assert_ok!(tester.delete(CERT, state).await);
    assert_eq!(fake.get_calls(), 2);
    assert!(!fake.contains(&gvr(), &web()));
}

#[tokio::test]
async fn test_conflicting_manager_requires_force() {
    let (tester, fake) = tester().await;
    let gitops = ApplyOptions {
        field_manager: "gitops".to_string(),
        force_conflicts: false,
    };
    assert_ok!(
        fake.apply(
            &gvr(),
            &web(),
            &json!({
                "apiVersion": "cert-manager.io/v1",
                "kind": "Certificate",
                "metadata": {"name": "web", "namespace": "default"},
                "spec": {"secretName": "gitops-tls"}
            }),
            &gitops,
        )
        .await
    );

    let err = assert_err!(tester.create(CERT, certificate("web", "web-tls")).await);
    assert!(matches!(err, ProviderError::Conflict(_)));
    assert!(err.message().contains("gitops"));
    assert!(err.message().contains(".spec.secretName"));
    assert!(!err.is_retryable());

    let mut forced = certificate("web", "web-tls");
    forced["force_conflicts"] = json!(true);
    let state = assert_ok!(tester.create(CERT, forced).await);
    assert_eq!(state["spec"]["secretName"], "web-tls");
    assert_eq!(
        fake.field_owner(&gvr(), &web(), &["spec", "secretName"]),
        Some("platform".to_string())
    );
}

#[tokio::test]
async fn test_import_adopts_existing_object() {
    let (tester, fake) = tester().await;
    fake.insert(
        &gvr(),
        json!({
            "apiVersion": "cert-manager.io/v1",
            "kind": "Certificate",
            "metadata": {"name": "web", "namespace": "default", "uid": "abc", "managedFields": []},
            "spec": {"secretName": "web-tls", "issuerRef": {"name": "ca"}},
            "status": {"conditions": [{"type": "Ready", "status": "True"}]}
        }),
    );

    let imported = assert_ok!(tester.import_resource(CERT, "default/web").await);
    assert_eq!(imported.len(), 1);
    let state = &imported[0].state;
    assert_eq!(imported[0].resource_type, CERT);
    assert_eq!(state["id"], "default/web");
    assert_eq!(state["spec"]["secretName"], "web-tls");
    assert!(state.get("status").is_none());
    assert!(state["metadata"].get("uid").is_none());

    let err = assert_err!(tester.import_resource(CERT, "default/missing").await);
    assert!(err.is_not_found());
    let err = assert_err!(tester.import_resource(CERT, "default/web/extra").await);
    assert!(matches!(err, ProviderError::InvalidImportId(_)));
}

#[tokio::test]
async fn test_delete_of_missing_object_succeeds() {
    let (tester, fake) = tester().await;
    assert_ok!(tester.delete(CERT, certificate("ghost", "ghost-tls")).await);
    assert_eq!(fake.delete_calls(), 1);
    assert_eq!(fake.get_calls(), 1);
}

#[tokio::test]
async fn test_transient_failure_is_retryable() {
    let (tester, fake) = tester().await;
    fake.fail_next(503, "etcdserver: request timed out");

    let err = assert_err!(tester.create(CERT, certificate("web", "web-tls")).await);
    assert!(err.is_retryable());
    assert!(!fake.contains(&gvr(), &web()));

    assert_ok!(tester.create(CERT, certificate("web", "web-tls")).await);
}

#[tokio::test(start_paused = true)]
async fn test_delete_waits_for_finalizers() {
    let (tester, fake) = tester().await;
    let mut state = assert_ok!(tester.create(CERT, certificate("web", "web-tls")).await);
    state["deletion_propagation"] = json!("Background");
    state["wait_for_delete"] = json!({"timeout": 30, "poll_interval": 2});
    fake.set_deletion_lag(2);

    let start = Instant::now();
    assert_ok!(tester.delete(CERT, state).await);

    assert_eq!(start.elapsed(), Duration::from_secs(4));
    assert_eq!(fake.get_calls(), 3);
    assert_eq!(fake.last_propagation(), Some(DeletionPropagation::Background));
    assert!(!fake.contains(&gvr(), &web()));
}

#[tokio::test(start_paused = true)]
async fn test_delete_gives_up_at_timeout() {
    let (tester, fake) = tester().await;
    let mut state = assert_ok!(tester.create(CERT, certificate("web", "web-tls")).await);
    state["wait_for_delete"] = json!({"timeout": 10, "poll_interval": 3});
    fake.set_deletion_lag(100);

    let start = Instant::now();
    let err = assert_err!(tester.delete(CERT, state).await);

    assert!(matches!(err, ProviderError::DeadlineExceeded(_)));
    assert_eq!(start.elapsed(), Duration::from_secs(10));
    assert!(fake.contains(&gvr(), &web()));
}

#[tokio::test(start_paused = true)]
async fn test_create_waits_for_ready_condition() {
    let fake = FakeApplyClient::new();
    let provider = Arc::new(CrdProvider::with_client(
        Catalog::builtin(),
        Arc::new(fake.clone()),
    ));
    assert_ok!(provider.configure(json!({})).await);

    let mut config = certificate("web", "web-tls");
    config["wait_for_upsert"] = json!([{
        "jsonpath": ".status.conditions[?(@.type=='Ready')].status",
        "value": "True",
        "timeout": 60,
        "poll_interval": 5
    }]);

    let start = Instant::now();
    let create = tokio::spawn({
        let provider = provider.clone();
        async move { provider.create(CERT, config).await }
    });

    while !fake.contains(&gvr(), &web()) {
        tokio::task::yield_now().await;
    }
    fake.set_status(
        &gvr(),
        &web(),
        json!({"conditions": [{"type": "Ready", "status": "True"}]}),
    );

    let state = assert_ok!(create.await.unwrap());
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert_eq!(state["wait_for_upsert"][0]["value"], "True");
    assert!(state.get("status").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_create_fails_when_condition_never_holds() {
    let (tester, fake) = tester().await;
    let mut config = certificate("web", "web-tls");
    config["wait_for_upsert"] =
        json!([{"jsonpath": ".status.phase", "value": "Ready", "timeout": 20}]);

    let err = assert_err!(tester.create(CERT, config).await);
    assert!(matches!(err, ProviderError::DeadlineExceeded(_)));
    assert!(err.message().contains(".status.phase"));
    assert!(fake.contains(&gvr(), &web()));
}

#[tokio::test]
async fn test_manifest_data_source_never_calls_the_cluster() {
    let (tester, fake) = tester().await;
    let manifest = format!("{}_manifest", CERT);
    assert!(tester.data_source_types().contains(&manifest));

    let state = assert_ok!(
        tester
            .read_data_source(&manifest, certificate("web", "web-tls"))
            .await
    );
    let yaml = state["yaml"].as_str().unwrap();
    assert!(yaml.starts_with("apiVersion: cert-manager.io/v1\n"));
    assert!(yaml.contains("  labels:\n    app: web\n"));
    assert!(yaml.contains("name: letsencrypt"));
    assert_eq!(fake.get_calls() + fake.apply_calls(), 0);
}
