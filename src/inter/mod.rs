/*!
Interoperation between the client (user) and server.

(Not the application and the database; that's covered by `store`.)
*/
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::{header::CONTENT_TYPE, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, get_service, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::fs::ServeFile,
};

use crate::config::Glob;
use crate::error::PortalError;
use crate::session::{session_layer, SessionId};
use crate::user::{classify, UserRecord};

static TEXT_500: &str = "An internal error occurred; an appropriate response was inconstructable.";

/// Body of a `POST /login`. Missing fields count as empty.
#[derive(Deserialize)]
pub struct LoginData {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub fn text_500(text: Option<String>) -> Response {
    match text {
        Some(text) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            text
        ).into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            TEXT_500.to_owned()
        ).into_response()
    }
}

/**
Log the client in as whatever role its username implies.

The password is read and then ignored; see `user::classify()`.
*/
pub async fn login(
    Extension(glob): Extension<Arc<Glob>>,
    Extension(sid): Extension<SessionId>,
    payload: Result<Json<LoginData>, JsonRejection>,
) -> Result<Json<Value>, PortalError> {
    let form = match payload {
        Ok(Json(form)) => form,
        Err(rej) => {
            log::info!("Unreadable login request: {}", rej.body_text());
            return Err(PortalError::MalformedRequest(rej.body_text()));
        },
    };

    log::trace!(
        "login( {:?}, [ {} byte password ] ) called.",
        &form.username, form.password.len()
    );

    let role = match classify(&form.username) {
        Ok(role) => role,
        Err(e) => {
            log::info!("Rejected login for {:?}.", &form.username);
            return Err(e);
        },
    };

    glob.sessions.create(&sid, UserRecord::new(form.username.clone(), role)).await;
    log::info!("{:?} logged in as {}.", &form.username, &role);

    Ok(Json(json!({
        "success": true,
        "role": role,
    })))
}

pub async fn logout(
    Extension(glob): Extension<Arc<Glob>>,
    Extension(sid): Extension<SessionId>,
) -> Json<Value> {
    log::trace!("logout( {:?} ) called.", &sid);

    glob.sessions.destroy(&sid).await;
    Json(json!({ "success": true }))
}

/// Every row of the view belonging to the logged-in client's role.
pub async fn data(
    Extension(glob): Extension<Arc<Glob>>,
    Extension(sid): Extension<SessionId>,
) -> Result<Json<Value>, PortalError> {
    log::trace!("data( {:?} ) called.", &sid);

    let user = match glob.sessions.get(&sid).await {
        Some(user) if user.logged_in => user,
        _ => { return Err(PortalError::NotAuthenticated); },
    };

    let rows = glob.gateway.fetch(user.role).await?;
    log::debug!("Serving {} rows to {:?} ({}).", rows.len(), &user.username, &user.role);

    Ok(Json(json!({
        "success": true,
        "data": rows,
    })))
}

/// The whole application, ready to be served.
pub fn router(glob: Arc<Glob>) -> Router {
    let login_page = glob.page_dir.join("login.html");
    let dashboard_page = glob.page_dir.join("dashbord.html");

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/", get_service(ServeFile::new(&login_page)))
        .route("/login.html", get_service(ServeFile::new(&login_page)))
        .route("/dashbord.html", get_service(ServeFile::new(&dashboard_page)))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/api/data", get(data))
        .layer(middleware::from_fn(session_layer))
        .layer(Extension(glob))
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cfg;
    use crate::session::{MemoryStore, COOKIE_NAME};
    use crate::store::{access::AccessTable, rows::Row, DataAccessError, DataGateway, PgGateway, Stage};
    use crate::tests::ensure_logging;
    use crate::user::Role;

    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use cookie::Cookie;
    use axum::{
        body::Body,
        http::{header, HeaderMap, Request},
    };
    use tower::ServiceExt;

    /// Hands back one row naming the view it "read", with shouty column
    /// names already lower-cased the way `store::rows` does it.
    struct FakeGateway {
        table: AccessTable,
        calls: Mutex<Vec<Role>>,
    }

    #[async_trait]
    impl DataGateway for FakeGateway {
        async fn fetch(&self, role: Role) -> Result<Vec<Row>, PortalError> {
            self.calls.lock().unwrap().push(role);
            let view = self.table.route_for(role)?;
            let row = json!({ "view": view, "player_id": 9 });
            match row {
                Value::Object(m) => Ok(vec![m]),
                _ => unreachable!(),
            }
        }
    }

    struct BrokenGateway;

    #[async_trait]
    impl DataGateway for BrokenGateway {
        async fn fetch(&self, _role: Role) -> Result<Vec<Row>, PortalError> {
            Err(DataAccessError::new(
                Stage::Connect,
                "error connecting to server: Connection refused (os error 111)"
            ).into())
        }
    }

    fn page_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data")
    }

    fn app_with(gateway: Arc<dyn DataGateway>) -> Router {
        let glob = Glob::new(page_dir(), Arc::new(MemoryStore::new()), gateway);
        router(Arc::new(glob))
    }

    fn fake_app() -> (Router, Arc<FakeGateway>) {
        let gw = Arc::new(FakeGateway {
            table: Cfg::default().access_table().unwrap(),
            calls: Mutex::new(Vec::new()),
        });
        (app_with(gw.clone()), gw)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        (status, headers, body.to_vec())
    }

    async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Option<String>, Value) {
        let (status, headers, body) = send(app, req).await;
        let cookie = issued_cookie(&headers);
        let v: Value = serde_json::from_slice(&body).unwrap();
        (status, cookie, v)
    }

    /// `name=value` part of the session `Set-Cookie` header, if there is one.
    fn issued_cookie(headers: &HeaderMap) -> Option<String> {
        headers.get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| Cookie::parse(v).ok())
            .find(|c| c.name() == COOKIE_NAME)
            .map(|c| format!("{}={}", c.name(), c.value()))
    }

    fn login_req(uname: &str, password: &str, cookie: Option<&str>) -> Request<Body> {
        let body = json!({ "username": uname, "password": password });
        let mut b = Request::post("/login").header(header::CONTENT_TYPE, "application/json");
        if let Some(c) = cookie {
            b = b.header(header::COOKIE, c);
        }
        b.body(Body::from(body.to_string())).unwrap()
    }

    fn data_req(cookie: Option<&str>) -> Request<Body> {
        let mut b = Request::get("/api/data");
        if let Some(c) = cookie {
            b = b.header(header::COOKIE, c);
        }
        b.body(Body::empty()).unwrap()
    }

    fn logout_req(cookie: &str) -> Request<Body> {
        Request::post("/logout")
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn data_requires_login() {
        ensure_logging();
        let (app, gw) = fake_app();

        let (status, cookie, v) = send_json(&app, data_req(None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(v, json!({ "success": false, "error": "Not authenticated" }));
        assert!(cookie.is_some());

        let (status, _, _) = send_json(&app, data_req(Some("portal.sid=madeup"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        assert!(gw.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn agent_joe() {
        ensure_logging();
        let (app, gw) = fake_app();

        let (status, cookie, v) = send_json(&app, login_req("agent_joe", "x", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v, json!({ "success": true, "role": "Agent" }));
        let cookie = cookie.unwrap();

        let (status, reissued, v) = send_json(&app, data_req(Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reissued, None);
        assert_eq!(v["success"], json!(true));
        assert_eq!(v["data"][0]["view"], json!("player_agent_view"));
        for key in v["data"][0].as_object().unwrap().keys() {
            assert_eq!(key, &key.to_lowercase());
        }

        assert_eq!(*gw.calls.lock().unwrap(), vec![Role::Agent]);
    }

    #[tokio::test]
    async fn cookie_with_spaces_keeps_session() {
        ensure_logging();
        let (app, _) = fake_app();

        let (_, cookie, _) = send_json(&app, login_req("agent_joe", "x", None)).await;
        let cookie = cookie.unwrap();
        let id = cookie.trim_start_matches("portal.sid=");
        let spaced = format!("theme=dark; portal.sid = {}", id);

        let (status, reissued, v) = send_json(&app, data_req(Some(&spaced))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reissued, None);
        assert_eq!(v["data"][0]["view"], json!("player_agent_view"));
    }

    #[tokio::test]
    async fn each_role_reads_its_view() {
        ensure_logging();
        let (app, gw) = fake_app();

        let cases = [
            ("manager_ann", "Manager", "club_manager_view"),
            ("secret.agent", "Agent", "player_agent_view"),
            ("data_analyst_7", "Analyst", "match_analyst_view"),
            ("agent_and_manager", "Manager", "club_manager_view"),
        ];

        for (uname, role, view) in cases {
            let (status, cookie, v) = send_json(&app, login_req(uname, "pw", None)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(v["role"], json!(role));

            let (status, _, v) = send_json(&app, data_req(cookie.as_deref())).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(v["data"][0]["view"], json!(view), "login as {:?}", uname);
        }

        assert_eq!(
            *gw.calls.lock().unwrap(),
            vec![Role::Manager, Role::Agent, Role::Analyst, Role::Manager]
        );
    }

    #[tokio::test]
    async fn invalid_username() {
        ensure_logging();
        let (app, _) = fake_app();

        for (uname, password) in [("bob", "Manager123"), ("", ""), ("Manager", "x"), ("ana", "")] {
            let (status, _, v) = send_json(&app, login_req(uname, password, None)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(v, json!({ "success": false, "message": "Invalid username" }));
        }

        let req = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"password": "x"}"#))
            .unwrap();
        let (status, _, v) = send_json(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(v["message"], json!("Invalid username"));
    }

    #[tokio::test]
    async fn unreadable_login_body() {
        ensure_logging();
        let (app, _) = fake_app();

        let reqs = [
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("username=agent_joe"))
                .unwrap(),
            Request::post("/login")
                .body(Body::from(r#"{"username": "agent_joe", "password": "x"}"#))
                .unwrap(),
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"username": 7}"#))
                .unwrap(),
        ];

        for req in reqs {
            let (status, _, v) = send_json(&app, req).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(v["success"], json!(false));
            assert!(!v["message"].as_str().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn password_is_not_checked() {
        ensure_logging();
        let (app, _) = fake_app();

        for password in ["", "x", "Manager123", "wrong wrong wrong"] {
            let (status, _, v) = send_json(&app, login_req("manager", password, None)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(v, json!({ "success": true, "role": "Manager" }));
        }
    }

    #[tokio::test]
    async fn failed_login_keeps_session_empty() {
        ensure_logging();
        let (app, _) = fake_app();

        let (_, cookie, _) = send_json(&app, login_req("nobody", "x", None)).await;
        let (status, _, _) = send_json(&app, data_req(cookie.as_deref())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_ends_session() {
        ensure_logging();
        let (app, _) = fake_app();

        let (_, cookie, _) = send_json(&app, login_req("analyst_kim", "x", None)).await;
        let cookie = cookie.unwrap();

        let (status, _, _) = send_json(&app, data_req(Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, v) = send_json(&app, logout_req(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v, json!({ "success": true }));

        let (status, _, v) = send_json(&app, data_req(Some(&cookie))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(v["error"], json!("Not authenticated"));
    }

    #[tokio::test]
    async fn relogin_switches_role() {
        ensure_logging();
        let (app, gw) = fake_app();

        let (_, cookie, _) = send_json(&app, login_req("manager_ann", "x", None)).await;
        let cookie = cookie.unwrap();
        let (_, reissued, v) = send_json(&app, login_req("analyst_ann", "x", Some(&cookie))).await;
        assert_eq!(reissued, None);
        assert_eq!(v["role"], json!("Analyst"));

        let (_, _, v) = send_json(&app, data_req(Some(&cookie))).await;
        assert_eq!(v["data"][0]["view"], json!("match_analyst_view"));
        assert_eq!(*gw.calls.lock().unwrap(), vec![Role::Analyst]);
    }

    #[tokio::test]
    async fn database_failure() {
        ensure_logging();
        let app = app_with(Arc::new(BrokenGateway));

        let (_, cookie, _) = send_json(&app, login_req("agent_joe", "x", None)).await;
        let (status, _, v) = send_json(&app, data_req(cookie.as_deref())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            v,
            json!({
                "success": false,
                "error": "error connecting to server: Connection refused (os error 111)"
            })
        );
    }

    #[tokio::test]
    async fn unreachable_postgres() {
        ensure_logging();

        let mut cfg = Cfg::default();
        for access in cfg.roles.values_mut() {
            access.credentials.connect_string =
                "host=127.0.0.1 port=1 dbname=xe connect_timeout=2".to_owned();
        }
        let app = app_with(Arc::new(PgGateway::new(cfg.access_table().unwrap())));

        let (_, cookie, _) = send_json(&app, login_req("manager_ann", "x", None)).await;
        let (status, _, v) = send_json(&app, data_req(cookie.as_deref())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(v["success"], json!(false));
        let msg = v["error"].as_str().unwrap().to_lowercase();
        assert!(msg.starts_with("error connecting to server: "), "{:?}", &msg);
        assert!(msg.contains("connection refused"), "{:?}", &msg);
    }

    #[tokio::test]
    async fn unknown_role_is_an_error() {
        ensure_logging();

        let mut cfg = Cfg::default();
        cfg.roles.remove(&Role::Agent);
        let app = app_with(Arc::new(PgGateway::new(cfg.access_table().unwrap())));

        let (_, cookie, _) = send_json(&app, login_req("agent_joe", "x", None)).await;
        let (status, _, v) = send_json(&app, data_req(cookie.as_deref())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(v["error"], json!("Unknown role: \"Agent\""));
    }

    #[tokio::test]
    async fn pages() {
        ensure_logging();
        let (app, _) = fake_app();

        for (path, marker) in [
            ("/", "id=\"login-form\""),
            ("/login.html", "id=\"login-form\""),
            ("/dashbord.html", "id=\"data-table\""),
        ] {
            let req = Request::get(path).body(Body::empty()).unwrap();
            let (status, headers, body) = send(&app, req).await;
            assert_eq!(status, StatusCode::OK, "GET {}", path);
            assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
            let body = String::from_utf8(body).unwrap();
            assert!(body.contains(marker), "GET {}", path);
        }
    }

    #[tokio::test]
    async fn cors_mirrors_origin() {
        ensure_logging();
        let (app, _) = fake_app();

        let req = Request::get("/api/data")
            .header(header::ORIGIN, "http://localhost:5500")
            .body(Body::empty())
            .unwrap();
        let (_, headers, _) = send(&app, req).await;
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:5500");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }
}
