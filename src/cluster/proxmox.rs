use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    ClusterApi, HaGroupRecord, HaResourceRecord, MigrateRequest, NodeRecord, TaskId, TaskRecord,
    TaskStatus, VmRecord,
};
use crate::config::ClusterSettings;
use crate::core::GuestKind;
use crate::errors::ClusterError;

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

#[derive(Debug, Clone)]
struct Ticket {
    cookie: HeaderValue,
    csrf_token: HeaderValue,
}

/// Proxmox VE REST client authenticated with a ticket.
pub struct ProxmoxClient {
    http: reqwest::Client,
    base_url: String,
    ticket: Option<Ticket>,
}

impl ProxmoxClient {
    pub fn new(host: &str, settings: &ClusterSettings) -> Result<Self, ClusterError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!settings.verify_tls)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: format!("https://{}:{}/api2/json", host, settings.port),
            ticket: None,
        })
    }

    /// Build a client and log in with the configured credentials.
    pub async fn connect(host: &str, settings: &ClusterSettings) -> Result<Self, ClusterError> {
        let mut client = Self::new(host, settings)?;
        let username = settings
            .username
            .as_deref()
            .ok_or_else(|| ClusterError::Auth("no username configured".into()))?;
        let password = settings
            .password
            .as_deref()
            .ok_or_else(|| ClusterError::Auth("no password configured".into()))?;
        client.login(username, password).await?;
        Ok(client)
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ClusterError> {
        // bare user names live in the PAM realm
        let username = if username.contains('@') {
            username.to_string()
        } else {
            format!("{}@pam", username)
        };

        let path = "/access/ticket";
        let response = self
            .http
            .post(self.url(path))
            .form(&[("username", username.as_str()), ("password", password)])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ClusterError::Auth(format!("login as {} rejected", username)));
        }
        let data: TicketData = Self::decode("POST", path, response).await?;

        let cookie = HeaderValue::from_str(&format!("PVEAuthCookie={}", data.ticket))
            .map_err(|e| ClusterError::Auth(e.to_string()))?;
        let csrf_token = HeaderValue::from_str(&data.csrf_token)
            .map_err(|e| ClusterError::Auth(e.to_string()))?;
        self.ticket = Some(Ticket { cookie, csrf_token });

        info!("Logged in to {} as {}", self.base_url, username);
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder, write: bool) -> RequestBuilder {
        let Some(ticket) = &self.ticket else {
            return request;
        };
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, ticket.cookie.clone());
        if write {
            headers.insert("CSRFPreventionToken", ticket.csrf_token.clone());
        }
        request.headers(headers)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ClusterError> {
        debug!("GET {}", path);
        let request = self.authorize(self.http.get(self.url(path)).query(query), false);
        Self::decode("GET", path, request.send().await?).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, ClusterError> {
        debug!("POST {} {:?}", path, form);
        let request = self.authorize(self.http.post(self.url(path)).form(form), true);
        Self::decode("POST", path, request.send().await?).await
    }

    async fn decode<T: DeserializeOwned>(
        method: &'static str,
        path: &str,
        response: Response,
    ) -> Result<T, ClusterError> {
        let status = response.status();
        let body = response.text().await?;
        parse_body(method, path, status, body)
    }
}

/// Unwrap the `{"data": ...}` envelope of a successful reply.
fn parse_body<T: DeserializeOwned>(
    method: &'static str,
    path: &str,
    status: StatusCode,
    body: String,
) -> Result<T, ClusterError> {
    if !status.is_success() {
        return Err(ClusterError::Api {
            method,
            path: path.to_string(),
            status: status.as_u16(),
            message: body,
        });
    }
    let envelope: Envelope<T> = serde_json::from_str(&body)?;
    Ok(envelope.data)
}

fn migrate_path(request: &MigrateRequest) -> String {
    format!(
        "/nodes/{}/{}/{}/migrate",
        request.source,
        request.kind.as_str(),
        request.vmid
    )
}

fn migrate_form(request: &MigrateRequest) -> [(&'static str, &str); 2] {
    // containers cannot move live, they get restarted on the target
    let live_flag = match request.kind {
        GuestKind::Qemu => "online",
        GuestKind::Lxc => "restart",
    };
    let live = if request.online { "1" } else { "0" };
    [("target", request.target.as_str()), (live_flag, live)]
}

#[async_trait]
impl ClusterApi for ProxmoxClient {
    async fn nodes(&self) -> Result<Vec<NodeRecord>, ClusterError> {
        self.get("/nodes", &[]).await
    }

    async fn vms(&self) -> Result<Vec<VmRecord>, ClusterError> {
        self.get("/cluster/resources", &[("type", "vm")]).await
    }

    async fn ha_groups(&self) -> Result<Vec<HaGroupRecord>, ClusterError> {
        self.get("/cluster/ha/groups", &[]).await
    }

    async fn ha_resources(&self) -> Result<Vec<HaResourceRecord>, ClusterError> {
        self.get("/cluster/ha/resources", &[]).await
    }

    async fn tasks(&self) -> Result<Vec<TaskRecord>, ClusterError> {
        self.get("/cluster/tasks", &[]).await
    }

    async fn migrate(&self, request: &MigrateRequest) -> Result<TaskId, ClusterError> {
        let path = migrate_path(request);
        let upid: String = self.post(&path, &migrate_form(request)).await?;
        Ok(TaskId::from(upid))
    }

    async fn task_status(&self, node: &str, task: &TaskId) -> Result<TaskStatus, ClusterError> {
        self.get(&format!("/nodes/{}/tasks/{}/status", node, task), &[])
            .await
    }
}
