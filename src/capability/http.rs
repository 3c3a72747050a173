use super::Capability;
use crate::error::CapabilityError;
use crate::script::convert::{dynamic_to_json, json_to_dynamic};
use crate::script::runtime::{bridge, host_error, ScriptResult};
use reqwest::{Client, Method};
use rhai::{Dynamic, EvalAltResult, ImmutableString, Map, Module, INT};

/// Outbound HTTP: `http::get(url)`, `http::post(url, body)`,
/// `http::request(method, url, #{headers, body})`.
///
/// Every call returns `#{status, headers, body}`; `body` is decoded from JSON when the
/// response declares a JSON content type.
pub struct HttpCapability {
    client: Client,
}

impl HttpCapability {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Capability for HttpCapability {
    fn name(&self) -> &str {
        "http"
    }

    fn build(&self) -> Result<Module, CapabilityError> {
        let mut module = Module::new();

        let client = self.client.clone();
        module.set_native_fn("get", move |url: ImmutableString| -> ScriptResult<Map> {
            send(&client, Method::GET, url.as_str(), &Map::new())
        });

        let client = self.client.clone();
        module.set_native_fn(
            "post",
            move |url: ImmutableString, body: Dynamic| -> ScriptResult<Map> {
                let mut options = Map::new();
                options.insert("body".into(), body);
                send(&client, Method::POST, url.as_str(), &options)
            },
        );

        let client = self.client.clone();
        module.set_native_fn(
            "request",
            move |method: ImmutableString, url: ImmutableString, options: Map| -> ScriptResult<Map> {
                let method = Method::from_bytes(method.to_uppercase().as_bytes())
                    .map_err(|_| host_error(format!("invalid HTTP method '{}'", method)))?;
                send(&client, method, url.as_str(), &options)
            },
        );

        Ok(module)
    }
}

fn send(client: &Client, method: Method, url: &str, options: &Map) -> ScriptResult<Map> {
    let mut request = client.request(method, url);
    if let Some(headers) = options.get("headers").and_then(|h| h.read_lock::<Map>()) {
        for (name, value) in headers.iter() {
            request = request.header(name.as_str(), value.to_string());
        }
    }
    if let Some(body) = options.get("body") {
        request = if body.is_string() {
            request.body(body.to_string())
        } else if !body.is_unit() {
            request.json(&dynamic_to_json(body))
        } else {
            request
        };
    }

    bridge(async move {
        let response = request.send().await.map_err(|e| host_error(e.to_string()))?;
        let status = response.status().as_u16() as INT;
        let mut headers = Map::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().into(), Dynamic::from(value.to_string()));
            }
        }
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("json"))
            .unwrap_or(false);
        let text = response.text().await.map_err(|e| host_error(e.to_string()))?;
        let body = if is_json {
            serde_json::from_str::<serde_json::Value>(&text)
                .map(|json| json_to_dynamic(&json))
                .unwrap_or_else(|_| Dynamic::from(text))
        } else {
            Dynamic::from(text)
        };

        let mut result = Map::new();
        result.insert("status".into(), Dynamic::from_int(status));
        result.insert("headers".into(), Dynamic::from_map(headers));
        result.insert("body".into(), body);
        Ok::<Map, Box<EvalAltResult>>(result)
    })?
}
