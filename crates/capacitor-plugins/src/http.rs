//! The `CapacitorHttp` plugin.
//!
//! On native hosts requests go through the platform's HTTP stack; elsewhere
//! the fallback performs them with `reqwest`.
//!
//! # Request Mapping
//!
//! | Option                  | Effect                                                   |
//! |-------------------------|----------------------------------------------------------|
//! | `method`                | HTTP verb, `GET` when absent                             |
//! | `params`                | Query string; values URI-encoded unless disabled         |
//! | `data` (string)         | Sent as-is                                               |
//! | `data` + form type      | `application/x-www-form-urlencoded` body                 |
//! | `data` + multipart type | `multipart/form-data` body; the boundary header is reset |
//! | `data` (other JSON)     | JSON body                                                |
//! | `connectTimeout`        | Connect timeout in milliseconds                          |
//! | `readTimeout`           | Read timeout in milliseconds                             |
//! | `disableRedirects`      | Redirect responses are returned instead of followed      |
//!
//! # Response Decoding
//!
//! A `application/json` content type always decodes as JSON. Otherwise a
//! successful response decodes per `responseType`: `arraybuffer` and `blob`
//! as base64, `json` as JSON, anything else as text. Unsuccessful responses
//! ignore `responseType`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use capacitor_core::{
    CapacitorException, ImplementationContext, Implementations, MethodTable, PluginHandle,
    PluginRegistry, PluginResult, WebImplementation, WebPlugin,
};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, redirect};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};
use url::form_urlencoded;

/// Registered plugin name.
pub const CAPACITOR_HTTP: &str = "CapacitorHttp";

/// How a response body is decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpResponseType {
    Arraybuffer,
    Blob,
    Json,
    #[default]
    Text,
    Document,
}

/// Marks request data that needs special encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HttpDataType {
    File,
    FormData,
}

/// A query parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HttpParam {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for HttpParam {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

impl From<Vec<String>> for HttpParam {
    fn from(values: Vec<String>) -> Self {
        Self::Many(values)
    }
}

/// Options of every `CapacitorHttp` method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpOptions {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, HttpParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<u64>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,
    #[serde(default)]
    pub disable_redirects: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<HttpResponseType>,
    /// Defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_encode_url_params: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<HttpDataType>,
}

impl HttpOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<HttpParam>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn response_type(mut self, response_type: HttpResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    /// The `Content-Type` header, matched case-insensitively.
    fn content_type(&self) -> &str {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
            .unwrap_or("")
    }
}

/// What every `CapacitorHttp` method resolves with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub data: Value,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub url: String,
}

/// Configuration section `plugins.CapacitorHttp`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpPluginConfig {
    /// `User-Agent` sent with every request.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Total request timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

fn transport_error(err: reqwest::Error) -> CapacitorException {
    CapacitorException::new(err.to_string())
}

// =============================================================================
// Request building
// =============================================================================

/// Builds the query string for `params`, or `None` when there are none.
///
/// Array values repeat their key. Keys are used as given.
pub fn build_url_params(params: &BTreeMap<String, HttpParam>, encode: bool) -> Option<String> {
    if params.is_empty() {
        return None;
    }
    let encode_value = |value: &str| {
        if encode {
            urlencoding::encode(value).into_owned()
        } else {
            value.to_string()
        }
    };
    let pairs: Vec<String> = params
        .iter()
        .flat_map(|(key, param)| {
            let values = match param {
                HttpParam::One(value) => vec![value.as_str()],
                HttpParam::Many(values) => values.iter().map(String::as_str).collect(),
            };
            values
                .into_iter()
                .map(|value| format!("{key}={}", encode_value(value)))
                .collect::<Vec<_>>()
        })
        .collect();
    Some(pairs.join("&"))
}

/// The request URL with its query string appended.
pub fn request_url(options: &HttpOptions) -> String {
    let encode = options.should_encode_url_params.unwrap_or(true);
    match build_url_params(&options.params, encode) {
        Some(query) if options.url.contains('?') => format!("{}&{query}", options.url),
        Some(query) => format!("{}?{query}", options.url),
        None => options.url.clone(),
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn multipart_form(data: &Value) -> PluginResult<Form> {
    let mut form = Form::new();
    match data {
        Value::Object(fields) => {
            for (key, value) in fields {
                form = form.text(key.clone(), text_of(value));
            }
        }
        // Entries of `{key, value, type, fileName?, contentType?}`.
        Value::Array(entries) => {
            for entry in entries {
                let key = entry["key"].as_str().unwrap_or_default().to_string();
                let value = entry["value"].as_str().unwrap_or_default();
                if entry["type"] == "base64File" {
                    let bytes = STANDARD
                        .decode(value)
                        .map_err(|e| CapacitorException::new(format!("invalid file data: {e}")))?;
                    let mut part = Part::bytes(bytes)
                        .file_name(entry["fileName"].as_str().unwrap_or("file").to_string());
                    if let Some(mime) = entry["contentType"].as_str() {
                        part = part.mime_str(mime).map_err(transport_error)?;
                    }
                    form = form.part(key, part);
                } else {
                    form = form.text(key, value.to_string());
                }
            }
        }
        other => form = form.text("data", text_of(other)),
    }
    Ok(form)
}

/// Maps `options` onto a request built from `client`.
///
/// Timeouts and redirect handling live on the client; see
/// [`client_for`].
pub fn build_request(client: &Client, options: &HttpOptions) -> PluginResult<RequestBuilder> {
    let method = options.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| CapacitorException::new(format!("invalid HTTP method: {method}")))?;

    let content_type = options.content_type().to_ascii_lowercase();
    let multipart = content_type.contains("multipart/form-data")
        || options.data_type == Some(HttpDataType::FormData);

    let mut request = client.request(method, request_url(options));
    for (name, value) in &options.headers {
        if multipart && name.eq_ignore_ascii_case("content-type") {
            continue;
        }
        request = request.header(name.as_str(), value.as_str());
    }

    let Some(data) = options.data.as_ref().filter(|d| !d.is_null()) else {
        return Ok(request);
    };
    request = match data {
        Value::String(body) if !multipart => request.body(body.clone()),
        _ if multipart => request.multipart(multipart_form(data)?),
        _ if content_type.contains("application/x-www-form-urlencoded") => {
            let mut form = form_urlencoded::Serializer::new(String::new());
            if let Value::Object(fields) = data {
                for (key, value) in fields {
                    form.append_pair(key, &text_of(value));
                }
            }
            request.body(form.finish())
        }
        _ => request.json(data),
    };
    Ok(request)
}

/// The client to send `options` with: `base` unless the options need their
/// own timeouts or redirect policy.
pub fn client_for(base: &Client, options: &HttpOptions) -> PluginResult<Client> {
    if options.connect_timeout.is_none()
        && options.read_timeout.is_none()
        && !options.disable_redirects
    {
        return Ok(base.clone());
    }
    let mut builder = Client::builder();
    if let Some(ms) = options.connect_timeout {
        builder = builder.connect_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = options.read_timeout {
        builder = builder.read_timeout(Duration::from_millis(ms));
    }
    if options.disable_redirects {
        builder = builder.redirect(redirect::Policy::none());
    }
    builder.build().map_err(transport_error)
}

// =============================================================================
// Response decoding
// =============================================================================

/// Decodes a response body. See the module docs for the rules.
pub fn decode_body(
    content_type: &str,
    response_type: Option<HttpResponseType>,
    success: bool,
    body: &[u8],
) -> PluginResult<Value> {
    let response_type = if content_type.contains("application/json") {
        HttpResponseType::Json
    } else if success {
        response_type.unwrap_or_default()
    } else {
        HttpResponseType::Text
    };

    match response_type {
        HttpResponseType::Arraybuffer | HttpResponseType::Blob => {
            Ok(Value::String(STANDARD.encode(body)))
        }
        HttpResponseType::Json if body.is_empty() => Ok(Value::Null),
        HttpResponseType::Json => Ok(serde_json::from_slice(body)?),
        HttpResponseType::Text | HttpResponseType::Document => {
            Ok(Value::String(String::from_utf8_lossy(body).into_owned()))
        }
    }
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}

// =============================================================================
// Web fallback
// =============================================================================

struct HttpWeb {
    base: WebPlugin,
    client: Client,
}

impl HttpWeb {
    fn new(ctx: &ImplementationContext) -> PluginResult<Self> {
        let config: HttpPluginConfig = ctx.config_as()?;
        let mut builder = Client::builder();
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.as_str());
        }
        if let Some(ms) = config.timeout {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        Ok(Self {
            base: WebPlugin::with_optional_window(ctx.window.clone()),
            client: builder.build().map_err(transport_error)?,
        })
    }

    async fn request(&self, options: HttpOptions) -> PluginResult<HttpResponse> {
        let client = client_for(&self.client, &options)?;
        let request = build_request(&client, &options)?;
        debug!(
            method = options.method.as_deref().unwrap_or("GET"),
            url = %options.url,
            "Sending HTTP request"
        );

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let url = response.url().to_string();
        let headers = header_map(response.headers());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let body = response.bytes().await.map_err(transport_error)?;
        trace!(status = status.as_u16(), bytes = body.len(), "HTTP response received");

        Ok(HttpResponse {
            data: decode_body(&content_type, options.response_type, status.is_success(), &body)?,
            status: status.as_u16(),
            headers,
            url,
        })
    }
}

impl WebImplementation for HttpWeb {
    fn web_plugin(&self) -> &WebPlugin {
        &self.base
    }

    fn methods() -> MethodTable<Self> {
        fn with_method(options: HttpOptions, method: &str) -> HttpOptions {
            HttpOptions {
                method: Some(method.to_string()),
                ..options
            }
        }

        MethodTable::new()
            .method("request", |this: Arc<Self>, options: HttpOptions| async move {
                this.request(options).await
            })
            .method("get", |this: Arc<Self>, options: HttpOptions| async move {
                this.request(with_method(options, "GET")).await
            })
            .method("post", |this: Arc<Self>, options: HttpOptions| async move {
                this.request(with_method(options, "POST")).await
            })
            .method("put", |this: Arc<Self>, options: HttpOptions| async move {
                this.request(with_method(options, "PUT")).await
            })
            .method("patch", |this: Arc<Self>, options: HttpOptions| async move {
                this.request(with_method(options, "PATCH")).await
            })
            .method("delete", |this: Arc<Self>, options: HttpOptions| async move {
                this.request(with_method(options, "DELETE")).await
            })
    }
}

// =============================================================================
// Typed client
// =============================================================================

/// Typed client for the `CapacitorHttp` plugin.
#[derive(Debug, Clone)]
pub struct CapacitorHttp {
    handle: PluginHandle,
}

impl CapacitorHttp {
    pub fn register(registry: &PluginRegistry) -> Self {
        let implementations = Implementations::new()
            .web(|ctx: ImplementationContext| async move { HttpWeb::new(&ctx) });
        Self {
            handle: registry.register(CAPACITOR_HTTP, implementations),
        }
    }

    pub fn handle(&self) -> &PluginHandle {
        &self.handle
    }

    pub async fn request(&self, options: &HttpOptions) -> PluginResult<HttpResponse> {
        self.handle.call_typed("request", options).await
    }

    pub async fn get(&self, options: &HttpOptions) -> PluginResult<HttpResponse> {
        self.handle.call_typed("get", options).await
    }

    pub async fn post(&self, options: &HttpOptions) -> PluginResult<HttpResponse> {
        self.handle.call_typed("post", options).await
    }

    pub async fn put(&self, options: &HttpOptions) -> PluginResult<HttpResponse> {
        self.handle.call_typed("put", options).await
    }

    pub async fn patch(&self, options: &HttpOptions) -> PluginResult<HttpResponse> {
        self.handle.call_typed("patch", options).await
    }

    pub async fn delete(&self, options: &HttpOptions) -> PluginResult<HttpResponse> {
        self.handle.call_typed("delete", options).await
    }
}
