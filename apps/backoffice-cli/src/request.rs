use crate::common::Context;
use anyhow::{Context as _, Result};
use backoffice_http::{
    ApiClient, CancellationToken, HttpError, Method, Payload, RequestOptions, normalize,
};
use clap::Args;
use serde_json::Value;

#[derive(Args)]
pub struct RequestArgs {
    /// HTTP method, case-insensitive
    pub method: String,
    /// Path relative to the API root, e.g. `/branches`
    pub path: String,
    /// JSON request body
    #[arg(long)]
    pub data: Option<String>,
    /// Print the payload as received instead of the normalized envelope
    #[arg(long)]
    pub raw: bool,
    /// Make a single attempt
    #[arg(long)]
    pub no_retry: bool,
    /// Extra header as `Name: value`; may be repeated
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

impl RequestArgs {
    pub async fn run(self, ctx: &Context) -> Result<()> {
        let client = ctx.client()?;

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        let output = self.execute(&client, cancel).await?;
        println!("{output}");
        Ok(())
    }

    async fn execute(&self, client: &ApiClient, cancel: CancellationToken) -> Result<String> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("invalid HTTP method '{}'", self.method))?;
        let body = self
            .data
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()
            .context("--data is not valid JSON")?;

        let mut options = RequestOptions::new().cancellation(cancel);
        if self.no_retry {
            options = options.no_retry();
        }
        for (name, value) in &self.headers {
            options = options.header(name, value);
        }

        match client.raw(method, &self.path, body.as_ref(), options).await {
            Ok(payload) => render(payload, self.raw),
            Err(HttpError::Api(err)) => {
                if let Some(data) = err.data.clone() {
                    eprintln!("{}", render(data, true)?);
                }
                Err(anyhow::Error::new(err).context("backend rejected the request"))
            }
            Err(e) => Err(anyhow::Error::new(e).context("request failed")),
        }
    }
}

fn render(payload: Payload, raw: bool) -> Result<String> {
    let json = if raw {
        payload.into_json()
    } else {
        serde_json::to_value(normalize(payload.into_json()))?
    };
    Ok(serde_json::to_string_pretty(&json)?)
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing header name in '{s}'"));
    }
    Ok((name.to_owned(), value.trim().to_owned()))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use backoffice_http::{ApiClientBuilder, HttpClientConfig, UrlBuilder};
    use httpmock::prelude::*;
    use serde_json::json;

    fn args(method: &str, path: &str) -> RequestArgs {
        RequestArgs {
            method: method.to_owned(),
            path: path.to_owned(),
            data: None,
            raw: false,
            no_retry: false,
            headers: Vec::new(),
        }
    }

    fn client(server: &MockServer) -> ApiClient {
        ApiClientBuilder::new()
            .http_config(HttpClientConfig::for_testing())
            .urls(UrlBuilder::direct(server.base_url()))
            .allow_insecure_http()
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("X-Request-Source: cli").unwrap(),
            ("X-Request-Source".to_owned(), "cli".to_owned())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_render_normalizes_unless_raw() {
        let body = json!({"status": "success", "data": [1, 2]});

        let normalized: Value =
            serde_json::from_str(&render(Payload::Json(body.clone()), false).unwrap()).unwrap();
        assert_eq!(normalized, json!({"success": true, "data": [1, 2]}));

        let raw: Value =
            serde_json::from_str(&render(Payload::Json(body.clone()), true).unwrap()).unwrap();
        assert_eq!(raw, body);

        let text: Value =
            serde_json::from_str(&render(Payload::Text("a,b".to_owned()), true).unwrap()).unwrap();
        assert_eq!(text, json!("a,b"));
    }

    #[tokio::test]
    async fn test_execute_post_with_body_and_header() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/orders")
                .header("x-request-source", "cli")
                .json_body(json!({"qty": 2}));
            then.status(201)
                .header("content-type", "application/json")
                .json_body(json!({"success": true, "data": {"id": 7}}));
        });

        let mut request = args("post", "/orders");
        request.data = Some(r#"{"qty": 2}"#.to_owned());
        request.headers = vec![("x-request-source".to_owned(), "cli".to_owned())];

        let output = request
            .execute(&client(&server), CancellationToken::new())
            .await
            .unwrap();
        let printed: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(printed, json!({"success": true, "data": {"id": 7}}));
        mock.assert();
    }

    #[tokio::test]
    async fn test_execute_reports_backend_error() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/branches/9");
            then.status(404)
                .header("content-type", "application/json")
                .json_body(json!({"message": "branch not found"}));
        });

        let err = args("get", "/branches/9")
            .execute(&client(&server), CancellationToken::new())
            .await
            .unwrap_err();
        let api = err.downcast_ref::<backoffice_http::ApiError>().unwrap();
        assert_eq!(api.status.as_u16(), 404);
        assert_eq!(api.message, "branch not found");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_execute_rejects_bad_input() {
        let server = MockServer::start();

        let mut request = args("get", "/x");
        request.data = Some("{not json".to_owned());
        assert!(
            request
                .execute(&client(&server), CancellationToken::new())
                .await
                .is_err()
        );

        assert!(
            args("BAD METHOD", "/x")
                .execute(&client(&server), CancellationToken::new())
                .await
                .is_err()
        );
    }
}
