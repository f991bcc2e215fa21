//! [`AccountClient`] over the RabbitMQ management HTTP API.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use keyward_sync::client::Method;
use keyward_sync::{AccountClient, AccountInfo, AccountSettings, ClientError, Permissions, WhoAmI};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::error::{io_err, DaemonError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocking management API client. Basic-auth credentials are mutable so
/// the engine can switch them between calls.
pub struct HttpAccountClient {
    agent: ureq::Agent,
    base: Url,
    username: String,
    password: String,
}

impl HttpAccountClient {
    /// Build a client for `management_uri`. `ca_file` is only read when the
    /// URI uses `https`.
    pub fn new(management_uri: &str, ca_file: &Path) -> Result<Self, DaemonError> {
        let base = Url::parse(management_uri).map_err(|e| DaemonError::InvalidUri {
            uri: management_uri.to_owned(),
            message: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(DaemonError::InvalidUri {
                uri: management_uri.to_owned(),
                message: "not a hierarchical URL".to_owned(),
            });
        }

        let mut builder = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT);
        if base.scheme() == "https" {
            builder = builder.tls_config(load_tls_config(ca_file)?);
        }

        Ok(Self {
            agent: builder.build(),
            base,
            username: String::new(),
            password: String::new(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorization(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }

    fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<serde_json::Value>,
    ) -> Result<ureq::Response, ClientError> {
        let request = self
            .agent
            .request_url(&method.to_string(), url)
            .set("Authorization", &self.authorization())
            .set("Accept", "application/json");
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };

        let path = url.path().to_owned();
        match result {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(401, _)) => Err(ClientError::Unauthorized { method, path }),
            Err(ureq::Error::Status(404, _)) => Err(ClientError::NotFound { method, path }),
            Err(ureq::Error::Status(status, response)) => Err(ClientError::Status {
                method,
                path,
                status,
                body: response.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(transport)) => Err(ClientError::Transport {
                method,
                path,
                message: transport.to_string(),
            }),
        }
    }

    fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ClientError> {
        let url = self.endpoint(segments);
        let response = self.send(Method::Get, &url, None)?;
        response.into_json().map_err(|e| ClientError::Transport {
            method: Method::Get,
            path: url.path().to_owned(),
            message: format!("invalid response body: {e}"),
        })
    }

    fn put<B: Serialize>(&self, segments: &[&str], body: &B) -> Result<(), ClientError> {
        let url = self.endpoint(segments);
        let body = serde_json::to_value(body).map_err(|e| ClientError::Transport {
            method: Method::Put,
            path: url.path().to_owned(),
            message: format!("unencodable request body: {e}"),
        })?;
        self.send(Method::Put, &url, Some(body)).map(|_| ())
    }
}

impl AccountClient for HttpAccountClient {
    fn fetch_account(&self, username: &str) -> Result<AccountInfo, ClientError> {
        self.get(&["api", "users", username])
    }

    fn upsert_account(&self, username: &str, settings: &AccountSettings) -> Result<(), ClientError> {
        self.put(&["api", "users", username], settings)
    }

    fn grant_permissions(
        &self,
        scope: &str,
        username: &str,
        permissions: &Permissions,
    ) -> Result<(), ClientError> {
        self.put(&["api", "permissions", scope, username], permissions)
    }

    fn who_am_i(&self) -> Result<WhoAmI, ClientError> {
        self.get(&["api", "whoami"])
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn set_username(&mut self, username: &str) {
        self.username = username.to_owned();
    }

    fn set_password(&mut self, password: &str) {
        self.password = password.to_owned();
    }
}

fn load_tls_config(ca_file: &Path) -> Result<Arc<rustls::ClientConfig>, DaemonError> {
    let pem = std::fs::read(ca_file).map_err(|e| io_err(ca_file, e))?;

    let mut roots = rustls::RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(&pem) {
        let cert = cert.map_err(|e| {
            DaemonError::Tls(format!("invalid certificate in {}: {e}", ca_file.display()))
        })?;
        roots.add(cert).map_err(|e| {
            DaemonError::Tls(format!("unusable certificate in {}: {e}", ca_file.display()))
        })?;
    }
    if roots.is_empty() {
        return Err(DaemonError::Tls(format!(
            "no certificates found in {}",
            ca_file.display()
        )));
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DaemonError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::path::PathBuf;
    use std::thread::{self, JoinHandle};

    use keyward_sync::client::{DEFAULT_HASHING_ALGORITHM, DEFAULT_SCOPE};

    use super::*;

    /// Captured request: request line, headers (lowercased names), body.
    struct Captured {
        request_line: String,
        headers: Vec<(String, String)>,
        body: String,
    }

    impl Captured {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
        }
    }

    /// Serve exactly one request with a canned response.
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let uri = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut headers = Vec::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
                }
            }
            let length = headers
                .iter()
                .find(|(n, _)| n == "content-length")
                .and_then(|(_, v)| v.parse::<usize>().ok())
                .unwrap_or(0);
            let mut request_body = vec![0; length];
            reader.read_exact(&mut request_body).unwrap();

            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            stream.flush().unwrap();

            Captured {
                request_line: request_line.trim_end().to_owned(),
                headers,
                body: String::from_utf8(request_body).unwrap(),
            }
        });
        (uri, handle)
    }

    fn client(uri: &str) -> HttpAccountClient {
        let mut client = HttpAccountClient::new(uri, Path::new("/nonexistent/ca.crt")).unwrap();
        client.set_username("admin");
        client.set_password("pwd1");
        client
    }

    #[test]
    fn fetch_account_decodes_list_tags_and_sends_basic_auth() {
        let (uri, server) = serve_once(
            "200 OK",
            r#"{"name":"default","hashing_algorithm":"myalgo","tags":["mytag"]}"#,
        );
        let info = client(&uri).fetch_account("default").unwrap();
        let request = server.join().unwrap();

        assert_eq!(info.name, "default");
        assert_eq!(info.hashing_algorithm, "myalgo");
        assert_eq!(info.tags.0, vec!["mytag"]);
        assert_eq!(request.request_line, "GET /api/users/default HTTP/1.1");
        // base64("admin:pwd1")
        assert_eq!(request.header("authorization"), Some("Basic YWRtaW46cHdkMQ=="));
    }

    #[test]
    fn upsert_sends_joined_tags_without_name() {
        let (uri, server) = serve_once("204 No Content", "");
        let settings = AccountSettings {
            name: "default".to_owned(),
            tags: vec!["a".to_owned(), "b".to_owned()],
            password: "pwd2".to_owned(),
            hashing_algorithm: DEFAULT_HASHING_ALGORITHM.to_owned(),
        };
        client(&uri).upsert_account("default", &settings).unwrap();
        let request = server.join().unwrap();

        assert_eq!(request.request_line, "PUT /api/users/default HTTP/1.1");
        let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "tags": "a,b",
                "password": "pwd2",
                "hashing_algorithm": DEFAULT_HASHING_ALGORITHM,
            })
        );
    }

    #[test]
    fn grant_encodes_default_scope_as_path_segment() {
        let (uri, server) = serve_once("201 Created", "");
        client(&uri)
            .grant_permissions(DEFAULT_SCOPE, "app", &Permissions::unrestricted())
            .unwrap();
        let request = server.join().unwrap();

        assert_eq!(request.request_line, "PUT /api/permissions/%2F/app HTTP/1.1");
        let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["configure"], ".*");
    }

    #[test]
    fn status_codes_map_to_client_errors() {
        let (uri, server) = serve_once("401 Unauthorized", "");
        let err = client(&uri).who_am_i().unwrap_err();
        server.join().unwrap();
        assert_eq!(
            err,
            ClientError::Unauthorized {
                method: Method::Get,
                path: "/api/whoami".to_owned()
            }
        );

        let (uri, server) = serve_once("404 Not Found", r#"{"error":"Object Not Found"}"#);
        let err = client(&uri).fetch_account("ghost").unwrap_err();
        server.join().unwrap();
        assert!(err.is_not_found());

        let (uri, server) = serve_once("500 Internal Server Error", "boom");
        let err = client(&uri).fetch_account("default").unwrap_err();
        server.join().unwrap();
        match err {
            ClientError::Status { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unreachable_service_is_a_transport_error() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = client(&format!("http://127.0.0.1:{port}"))
            .who_am_i()
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }), "{err:?}");
    }

    #[test]
    fn base_path_is_preserved() {
        let client = client("http://localhost:15672/rabbit/");
        assert_eq!(
            client.endpoint(&["api", "users", "a/b"]).path(),
            "/rabbit/api/users/a%2Fb"
        );
    }

    #[test]
    fn https_requires_readable_ca_file() {
        let missing = PathBuf::from("/nonexistent/keyward/ca.crt");
        let err = HttpAccountClient::new("https://localhost:15671", &missing)
            .err()
            .unwrap();
        assert!(matches!(err, DaemonError::Io { .. }));

        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("ca.crt");
        std::fs::write(&empty, "").unwrap();
        let err = HttpAccountClient::new("https://localhost:15671", &empty)
            .err()
            .unwrap();
        assert!(matches!(err, DaemonError::Tls(_)));
    }

    #[test]
    fn rejects_unparseable_uri() {
        let err = HttpAccountClient::new("not a uri", Path::new("ca.crt"))
            .err()
            .unwrap();
        assert!(matches!(err, DaemonError::InvalidUri { .. }));
    }
}
