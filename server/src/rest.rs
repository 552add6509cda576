//! HTTP endpoints: tables under `/rest/v1`, accounts under `/auth/v1` and objects
//! under `/storage/v1`.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kiln_proto::{ErrorBody, PasswordGrant, RefreshGrant, SignUpRequest};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{
    backend::{Failure, Selection},
    objects::StoredObject,
    state::{bearer, ServerState},
};

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body)).into_response()
    }
}

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/rest/v1/{table}", get(select_rows).post(insert_rows).patch(update_rows).delete(delete_rows))
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/signup", post(sign_up))
        .route("/auth/v1/logout", post(logout))
        .route("/storage/v1/object/public/{bucket}/{*path}", get(public_object))
        .route("/storage/v1/object/{bucket}/{*path}", get(download_object).post(upload_object))
}

/// The `Prefer` header preferences of a request
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Prefer {
    representation: bool,
    count: bool,
}

impl Prefer {
    fn from_headers(headers: &HeaderMap) -> Self {
        let mut prefer = Prefer::default();
        for value in headers.get_all("prefer").iter().filter_map(|v| v.to_str().ok()) {
            for item in value.split(',').map(str::trim) {
                match item {
                    "return=representation" => prefer.representation = true,
                    "count=exact" => prefer.count = true,
                    _ => {}
                }
            }
        }
        prefer
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Failure> {
    serde_json::from_slice(body).map_err(|e| Failure::new(400, "PGRST102", format!("Empty or invalid json: {}", e)))
}

fn admit_table(state: &ServerState, headers: &HeaderMap, table: &str) -> Result<(), Failure> {
    let caller = state.caller(headers)?;
    if let Some(spec) = state.backend.spec(table) {
        state.admit(&caller, &spec)?;
    }
    Ok(())
}

fn rows_response(status: StatusCode, rows: Vec<Value>, prefer: Prefer) -> Response {
    if prefer.representation {
        (status, Json(rows)).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn select_rows(
    State(state): State<ServerState>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, Failure> {
    admit_table(&state, &headers, &table)?;
    let selection = Selection::parse(&params)?;
    let (rows, total) = state.backend.select(&table, &selection)?;
    debug!("select {} -> {} of {}", table, rows.len(), total);

    let range = match rows.len() {
        0 => format!("*/{}", total),
        n => format!("{}-{}/{}", selection.offset, selection.offset + n - 1, total),
    };
    let mut response = Json(rows).into_response();
    if Prefer::from_headers(&headers).count {
        if let Ok(value) = HeaderValue::from_str(&range) {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
    }
    Ok(response)
}

async fn insert_rows(State(state): State<ServerState>, Path(table): Path<String>, headers: HeaderMap, body: Bytes) -> Result<Response, Failure> {
    admit_table(&state, &headers, &table)?;
    let rows = state.backend.insert(&table, parse_body(&body)?)?;
    Ok(rows_response(StatusCode::CREATED, rows, Prefer::from_headers(&headers)))
}

async fn update_rows(
    State(state): State<ServerState>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Result<Response, Failure> {
    admit_table(&state, &headers, &table)?;
    let selection = Selection::parse(&params)?;
    let rows = state.backend.update(&table, &selection, parse_body(&body)?)?;
    Ok(rows_response(StatusCode::OK, rows, Prefer::from_headers(&headers)))
}

async fn delete_rows(
    State(state): State<ServerState>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, Failure> {
    admit_table(&state, &headers, &table)?;
    let selection = Selection::parse(&params)?;
    let rows = state.backend.delete(&table, &selection)?;
    Ok(rows_response(StatusCode::OK, rows, Prefer::from_headers(&headers)))
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    grant_type: String,
}

async fn token(State(state): State<ServerState>, headers: HeaderMap, Query(query): Query<TokenQuery>, body: Bytes) -> Result<Response, Failure> {
    state.caller(&headers)?;
    let bundle = match query.grant_type.as_str() {
        "password" => {
            let grant: PasswordGrant = parse_body(&body)?;
            state.auth.password_grant(&grant.email, &grant.password)?
        }
        "refresh_token" => {
            let grant: RefreshGrant = parse_body(&body)?;
            state.auth.refresh_grant(&grant.refresh_token)?
        }
        other => {
            return Err(Failure {
                status: 400,
                body: ErrorBody { error: Some("unsupported_grant_type".into()), error_description: Some(format!("unsupported grant type {}", other)), ..Default::default() },
            })
        }
    };
    Ok(Json(bundle).into_response())
}

async fn sign_up(State(state): State<ServerState>, headers: HeaderMap, body: Bytes) -> Result<Response, Failure> {
    state.caller(&headers)?;
    let request: SignUpRequest = parse_body(&body)?;
    Ok(Json(state.auth.sign_up(&request.email, &request.password, request.data)?).into_response())
}

async fn logout(State(state): State<ServerState>, headers: HeaderMap) -> Result<Response, Failure> {
    state.check_api_key(&headers)?;
    let token = bearer(&headers).ok_or_else(|| Failure::new(401, "no_authorization", "This endpoint requires a Bearer token"))?;
    state.auth.logout(token)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn object_not_found() -> Failure { Failure { status: 404, body: ErrorBody { error: Some("not_found".into()), message: Some("Object not found".into()), ..Default::default() } } }

fn object_response(object: StoredObject) -> Response {
    let content_type = HeaderValue::from_str(&object.content_type).unwrap_or(HeaderValue::from_static("application/octet-stream"));
    ([(header::CONTENT_TYPE, content_type)], object.bytes).into_response()
}

async fn upload_object(State(state): State<ServerState>, Path((bucket, path)): Path<(String, String)>, headers: HeaderMap, body: Bytes) -> Result<Response, Failure> {
    state.caller(&headers)?;
    let upsert = headers.get("x-upsert").and_then(|v| v.to_str().ok()) == Some("true");
    if !upsert && state.objects.get(&bucket, &path).is_some() {
        return Err(Failure { status: 409, body: ErrorBody { error: Some("Duplicate".into()), message: Some("The resource already exists".into()), ..Default::default() } });
    }
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("application/octet-stream").to_string();
    let size = body.len();
    let replaced = state.objects.put(&bucket, &path, StoredObject { content_type, bytes: body });
    info!("Stored {} bytes at {}/{} (replaced: {})", size, bucket, path, replaced);
    Ok(Json(json!({ "Key": format!("{}/{}", bucket, path) })).into_response())
}

async fn download_object(State(state): State<ServerState>, Path((bucket, path)): Path<(String, String)>, headers: HeaderMap) -> Result<Response, Failure> {
    state.caller(&headers)?;
    state.objects.get(&bucket, &path).map(object_response).ok_or_else(object_not_found)
}

async fn public_object(State(state): State<ServerState>, Path((bucket, path)): Path<(String, String)>) -> Result<Response, Failure> {
    state.objects.get(&bucket, &path).map(object_response).ok_or_else(object_not_found)
}
