//! Tests for `OperatorServiceImpl`.

#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use tonic::{Code, Request};

use gridlink_proto::v1::operator_service_server::OperatorService;
use gridlink_proto::v1::start_diagnostic_request::Range;
use gridlink_proto::v1::{
    DiagnosticState, GetDiagnosticRequest, ListAgentsRequest, RegisterAgentRequest,
    RotateAgentSecretRequest, SetAgentActiveRequest, StartDiagnosticRequest,
};

use crate::diagnostics::Resolution;
use crate::server::operator_svc::OperatorServiceImpl;
use crate::server::test_helpers::{connect_agent, test_gateway, TestGateway};

fn service(gw: &TestGateway) -> OperatorServiceImpl {
    OperatorServiceImpl::new(
        gw.db.clone(),
        Arc::clone(&gw.manager),
        gw.verifier.clone(),
        gw.registry.clone(),
        Arc::clone(&gw.limiter),
    )
}

fn start_request(agent_id: &str, address: &str) -> StartDiagnosticRequest {
    StartDiagnosticRequest {
        agent_id: agent_id.into(),
        address: address.into(),
        port: 502,
        unit_id: 1,
        range: Some(Range::StartRegister(100)),
        count: 5,
    }
}

#[tokio::test]
async fn register_agent_returns_secret_once() {
    let gw = test_gateway().await;
    let svc = service(&gw);

    let resp = svc
        .register_agent(Request::new(RegisterAgentRequest {
            name: "substation-7".into(),
        }))
        .await
        .unwrap()
        .into_inner();

    assert!(!resp.secret.is_empty());
    let verified = gw.verifier.verify(&resp.secret).await.unwrap();
    assert_eq!(verified.agent_id, resp.agent_id);
}

#[tokio::test]
async fn short_agent_name_is_rejected() {
    let gw = test_gateway().await;
    let svc = service(&gw);

    let err = svc
        .register_agent(Request::new(RegisterAgentRequest { name: "ab".into() }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn rotate_returns_a_fresh_secret() {
    let gw = test_gateway().await;
    let (agent_id, initial) = gw.verifier.enroll("substation-7").await.unwrap();
    let svc = service(&gw);

    let resp = svc
        .rotate_agent_secret(Request::new(RotateAgentSecretRequest {
            agent_id: agent_id.clone(),
        }))
        .await
        .unwrap()
        .into_inner();

    assert!(!resp.secret.is_empty());
    assert_ne!(resp.secret, initial);
    assert!(!gw.verifier.verify(&resp.secret).await.unwrap().used_previous);
}

#[tokio::test]
async fn rotate_unknown_agent_is_not_found() {
    let gw = test_gateway().await;
    let svc = service(&gw);

    let err = svc
        .rotate_agent_secret(Request::new(RotateAgentSecretRequest {
            agent_id: "ghost".into(),
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn start_without_range_is_invalid() {
    let gw = test_gateway().await;
    gw.db.create_agent("a1", "n", "h").await.unwrap();
    let svc = service(&gw);

    let mut req = start_request("a1", "10.0.0.5");
    req.range = None;
    let err = svc.start_diagnostic(Request::new(req)).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn start_against_offline_agent_is_unavailable_with_session_id() {
    let gw = test_gateway().await;
    gw.db.create_agent("a1", "n", "h").await.unwrap();
    let svc = service(&gw);

    let err = svc
        .start_diagnostic(Request::new(start_request("a1", "10.0.0.5")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);

    // Even the failed session is inspectable by id
    let session_id = err
        .metadata()
        .get("session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let resp = svc
        .get_diagnostic(Request::new(GetDiagnosticRequest { session_id }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.state, DiagnosticState::Error as i32);
    assert!(!resp.error.is_empty());
}

#[tokio::test]
async fn start_and_poll_to_completion() {
    let gw = test_gateway().await;
    gw.db.create_agent("a1", "n", "h").await.unwrap();
    let mut rx = connect_agent(&gw.registry, "a1").await;
    let svc = service(&gw);

    let started = svc
        .start_diagnostic(Request::new(start_request("a1", "10.0.0.5")))
        .await
        .unwrap()
        .into_inner();
    assert!(!started.session_id.is_empty());
    assert_eq!(started.timeout_secs, 30);
    rx.recv().await.unwrap();

    let resp = svc
        .get_diagnostic(Request::new(GetDiagnosticRequest {
            session_id: started.session_id.clone(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.state, DiagnosticState::Sent as i32);

    gw.manager
        .resolve(
            "a1",
            Resolution {
                session_id: started.session_id.clone(),
                success: true,
                values: vec![7, 8, 9],
                error: None,
                elapsed_ms: Some(120),
            },
        )
        .await
        .unwrap();

    let resp = svc
        .get_diagnostic(Request::new(GetDiagnosticRequest {
            session_id: started.session_id,
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.state, DiagnosticState::Completed as i32);
    assert_eq!(resp.values, vec![7, 8, 9]);
    assert_eq!(resp.elapsed_ms, 120);
}

#[tokio::test]
async fn repeat_target_within_cooldown_is_resource_exhausted() {
    let gw = test_gateway().await;
    gw.db.create_agent("a1", "n", "h").await.unwrap();
    let _rx = connect_agent(&gw.registry, "a1").await;
    let svc = service(&gw);

    svc.start_diagnostic(Request::new(start_request("a1", "10.0.0.5")))
        .await
        .unwrap();

    let err = svc
        .start_diagnostic(Request::new(start_request("a1", "10.0.0.5")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::ResourceExhausted);

    let retry: i64 = err
        .metadata()
        .get("retry-after-secs")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry > 0 && retry <= 60);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let gw = test_gateway().await;
    let svc = service(&gw);

    let err = svc
        .get_diagnostic(Request::new(GetDiagnosticRequest {
            session_id: "missing".into(),
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn list_agents_reports_connection_and_active_state() {
    let gw = test_gateway().await;
    gw.db.create_agent("a1", "online-agent", "h").await.unwrap();
    gw.db.create_agent("a2", "offline-agent", "h2").await.unwrap();
    let _rx = connect_agent(&gw.registry, "a1").await;
    let svc = service(&gw);

    svc.set_agent_active(Request::new(SetAgentActiveRequest {
        agent_id: "a2".into(),
        active: false,
    }))
    .await
    .unwrap();

    let resp = svc
        .list_agents(Request::new(ListAgentsRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.agents.len(), 2);

    let a1 = resp.agents.iter().find(|a| a.agent_id == "a1").unwrap();
    assert!(a1.connected);
    assert!(a1.active);

    let a2 = resp.agents.iter().find(|a| a.agent_id == "a2").unwrap();
    assert!(!a2.connected);
    assert!(!a2.active);
}
