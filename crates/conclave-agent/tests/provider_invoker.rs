//! Integration tests for `ProviderInvoker` against mocked provider APIs.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use conclave_agent::{
    AgentInvoker, CredentialsConfig, ProviderInvoker, RoleBinding, TableCapabilityResolver,
};
use conclave_core::ConclaveError;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn invoker_for(toml_src: &str) -> ProviderInvoker {
    let credentials: CredentialsConfig = toml::from_str(toml_src).unwrap();
    ProviderInvoker::new(
        Arc::new(TableCapabilityResolver::new(credentials)),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn openai_compatible_call_returns_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer ds-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "MA20 holds as support." } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let invoker = invoker_for(&format!(
        r#"
        default_provider = "deepseek"

        [providers.deepseek]
        api_key = "ds-test"
        base_url = "{}/v1"
        "#,
        server.uri()
    ));

    let text = invoker
        .invoke(&RoleBinding::role("analyst"), "Analyse 600519")
        .await
        .unwrap();
    assert_eq!(text, "MA20 holds as support.");
}

#[tokio::test]
async fn http_error_is_reported_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(1)
        .mount(&server)
        .await;

    let invoker = invoker_for(&format!(
        r#"
        default_provider = "openai"

        [providers.openai]
        api_key = "sk-test"
        base_url = "{}/v1"
        "#,
        server.uri()
    ));

    let err = invoker
        .invoke(&RoleBinding::role("analyst"), "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, ConclaveError::Http(_)));
    assert!(err.to_string().contains("502"));
}

#[tokio::test]
async fn gemini_call_uses_generate_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-pro:generateContent"))
        .and(query_param("key", "g-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "Bearish divergence." }] } }]
        })))
        .mount(&server)
        .await;

    let invoker = invoker_for(&format!(
        r#"
        [providers.gemini]
        api_key = "g-test"
        base_url = "{}/v1beta"

        [roles.synthesizer]
        provider = "gemini"
        model = "gemini-1.5-pro"
        "#,
        server.uri()
    ));

    let text = invoker
        .invoke(&RoleBinding::role("synthesizer"), "Summarise")
        .await
        .unwrap();
    assert_eq!(text, "Bearish divergence.");
}

#[test]
fn ensure_ready_reports_missing_credentials() {
    let invoker = invoker_for(
        r#"
        default_provider = "qwen"
        "#,
    );
    let err = invoker
        .ensure_ready(&RoleBinding::role("synthesizer"))
        .unwrap_err();
    assert!(matches!(err, ConclaveError::MissingCredential(_)));
}
