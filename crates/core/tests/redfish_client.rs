//! RedfishClient against an in-process axum Redfish service.

use std::sync::Arc;

use amt_protocol::ResetType;
use amt_session::power::PowerState;
use amt_session::redfish::{AuthMode, RedfishClient};
use amt_session::SessionError;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use url::Url;

const SYSTEM: &str = "4c4c4544-0035-5910-8031-c2c04f4a4b33";
const UNKNOWN_SYSTEM: &str = "00000000-0000-0000-0000-000000000000";

#[derive(Clone, Default)]
struct Service {
	log: Arc<Mutex<Vec<String>>>,
	auth: Arc<Mutex<Vec<String>>>,
}

impl Service {
	fn record(&self, headers: &HeaderMap, what: String) {
		let auth = headers
			.get("x-auth-token")
			.map(|v| format!("token:{}", v.to_str().unwrap_or_default()))
			.or_else(|| headers.get(header::AUTHORIZATION).map(|v| v.to_str().unwrap_or_default().to_string()))
			.unwrap_or_default();
		self.auth.lock().push(auth);
		self.log.lock().push(what);
	}
}

async fn get_system(State(s): State<Service>, headers: HeaderMap, Path(id): Path<String>) -> impl IntoResponse {
	s.record(&headers, format!("GET {id}"));
	if id == UNKNOWN_SYSTEM {
		return (StatusCode::NOT_FOUND, Json(json!({ "error": { "message": "no such system" } })));
	}
	(
		StatusCode::OK,
		Json(json!({ "@odata.id": format!("/redfish/v1/Systems/{id}"), "Id": id, "PowerState": "Off" })),
	)
}

async fn reset(State(s): State<Service>, headers: HeaderMap, Path(id): Path<String>, Json(body): Json<Value>) -> axum::response::Response {
	s.record(&headers, format!("RESET {id} {}", body["ResetType"].as_str().unwrap_or_default()));
	if body["ResetType"] == "Nmi" {
		let envelope = json!({
			"error": {
				"code": "Base.1.8.GeneralError",
				"@Message.ExtendedInfo": [
					{ "MessageId": "Base.1.8.ActionParameterNotSupported", "Message": "The parameter ResetType value Nmi is not supported" }
				]
			}
		});
		return (StatusCode::BAD_REQUEST, Json(envelope)).into_response();
	}
	(
		StatusCode::ACCEPTED,
		[(header::LOCATION, "/redfish/v1/TaskService/Tasks/7")],
		Json(json!({ "@odata.type": "#Task.v1_6_0.Task", "Id": "7", "TaskState": "Running" })),
	)
		.into_response()
}

async fn serve(service: Service) -> Url {
	let app = Router::new()
		.route("/redfish/v1/Systems/{id}", get(get_system))
		.route("/redfish/v1/Systems/{id}/Actions/ComputerSystem.Reset", post(reset))
		.route(
			"/redfish/v1/SessionService/Sessions",
			post(|State(s): State<Service>, Json(body): Json<Value>| async move {
				s.log.lock().push(format!("LOGIN {}", body["UserName"].as_str().unwrap_or_default()));
				(
					StatusCode::CREATED,
					[("x-auth-token", "session-abc"), ("location", "/redfish/v1/SessionService/Sessions/1")],
					Json(json!({ "Id": "1" })),
				)
			}),
		)
		.route(
			"/redfish/v1/SessionService/Sessions/{id}",
			delete(|State(s): State<Service>, headers: HeaderMap, Path(id): Path<String>| async move {
				s.record(&headers, format!("LOGOUT {id}"));
				StatusCode::NO_CONTENT
			}),
		)
		.with_state(service);

	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});
	Url::parse(&format!("http://{addr}/")).unwrap()
}

#[tokio::test]
async fn basic_auth_reads_power_state() {
	let service = Service::default();
	let client = RedfishClient::builder(serve(service.clone()).await)
		.credentials("admin", "secret")
		.build()
		.unwrap();

	assert_eq!(client.power_state(SYSTEM).await.unwrap(), PowerState::Off);
	assert_eq!(service.auth.lock().clone(), vec!["Basic YWRtaW46c2VjcmV0".to_string()]);
}

#[tokio::test]
async fn session_auth_uses_token_and_logs_out() {
	let service = Service::default();
	let client = RedfishClient::builder(serve(service.clone()).await)
		.credentials("admin", "secret")
		.auth_mode(AuthMode::Session)
		.build()
		.unwrap();

	client.login().await.unwrap();
	assert!(client.has_session());
	client.system(SYSTEM).await.unwrap();
	client.logout().await.unwrap();
	assert!(!client.has_session());

	assert_eq!(
		service.log.lock().clone(),
		vec!["LOGIN admin".to_string(), format!("GET {SYSTEM}"), "LOGOUT 1".to_string()]
	);
	assert_eq!(service.auth.lock().clone(), vec!["token:session-abc".to_string(), "token:session-abc".to_string()]);
}

#[tokio::test]
async fn accepted_reset_carries_task_and_location() {
	let service = Service::default();
	let client = RedfishClient::builder(serve(service.clone()).await)
		.credentials("admin", "secret")
		.build()
		.unwrap();

	let accepted = client.reset(SYSTEM, ResetType::ForceOff).await.unwrap();
	assert_eq!(accepted.location.as_deref(), Some("/redfish/v1/TaskService/Tasks/7"));
	assert_eq!(accepted.task.unwrap().task_state.as_deref(), Some("Running"));
	assert_eq!(service.log.lock().clone(), vec![format!("RESET {SYSTEM} ForceOff")]);
}

#[tokio::test]
async fn rejected_reset_surfaces_extended_info() {
	let client = RedfishClient::builder(serve(Service::default()).await).build().unwrap();

	match client.reset(SYSTEM, ResetType::Nmi).await.unwrap_err() {
		SessionError::Validation { details, .. } => {
			assert_eq!(details, vec!["The parameter ResetType value Nmi is not supported".to_string()]);
		}
		other => panic!("unexpected error: {other:?}"),
	}
}

#[tokio::test]
async fn unknown_system_is_unavailable() {
	let client = RedfishClient::builder(serve(Service::default()).await).build().unwrap();

	let err = client.power_state(UNKNOWN_SYSTEM).await.unwrap_err();
	assert!(matches!(err, SessionError::NotFound { .. }));
	assert!(err.is_unavailable());
}

#[tokio::test]
async fn malformed_system_id_never_reaches_the_service() {
	let service = Service::default();
	let client = RedfishClient::builder(serve(service.clone()).await).build().unwrap();

	let err = client.reset("not-a-uuid", ResetType::On).await.unwrap_err();
	assert!(matches!(err, SessionError::InvalidInput(_)));
	assert!(service.log.lock().is_empty());
}

#[tokio::test]
async fn login_without_credentials_is_invalid_input() {
	let client = RedfishClient::builder(serve(Service::default()).await)
		.auth_mode(AuthMode::Session)
		.build()
		.unwrap();

	assert!(matches!(client.login().await.unwrap_err(), SessionError::InvalidInput(_)));
}
