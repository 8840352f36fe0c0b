//! ServiceNow Table API client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::ServiceNowConfig;
use crate::inspector::{AttachmentFetcher, InspectionError};
use crate::metrics;
use crate::ticket::{
    AttachmentRef, SourceError, Ticket, TicketKind, TicketOutcome, TicketSource, TicketStatus,
    TicketUpdate, TicketUpdater, UpdateError,
};

use super::wire::{AttachmentRow, RecordPatch, RecordRow, ResultList};

/// Fields requested for every ticket row.
const BASE_FIELDS: &[&str] = &[
    "sys_id",
    "number",
    "short_description",
    "description",
    "caller_id",
    "requested_for",
    "opened_at",
];

/// Transport-level failure, mapped to each caller's error type.
#[derive(Debug)]
enum RequestError {
    Timeout,
    Unreachable(String),
    Status(StatusCode, String),
    Parse(String),
}

impl RequestError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RequestError::Timeout
        } else {
            RequestError::Unreachable(e.to_string())
        }
    }

    fn detail(&self) -> String {
        match self {
            RequestError::Timeout => "request timed out".to_string(),
            RequestError::Unreachable(msg) => msg.clone(),
            RequestError::Status(status, body) => format!("HTTP {}: {}", status, body),
            RequestError::Parse(msg) => format!("invalid response: {}", msg),
        }
    }
}

impl From<RequestError> for SourceError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Timeout => SourceError::Timeout,
            RequestError::Parse(_) => SourceError::Malformed(e.detail()),
            _ => SourceError::Unavailable(e.detail()),
        }
    }
}

impl From<RequestError> for UpdateError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Timeout => UpdateError::Timeout,
            _ => UpdateError::Failed(e.detail()),
        }
    }
}

impl From<RequestError> for InspectionError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Timeout => InspectionError::Timeout,
            _ => InspectionError::Unreadable(e.detail()),
        }
    }
}

/// Client for a ServiceNow instance.
///
/// One client covers the three ticketing seams: polling the assignment
/// group's queue, downloading attachments and writing outcomes back.
pub struct ServiceNowClient {
    client: Client,
    config: ServiceNowConfig,
}

impl ServiceNowClient {
    /// Create a new ServiceNow client.
    pub fn new(config: ServiceNowConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/api/now/table/{}", self.base_url(), table)
    }

    fn record_url(&self, table: &str, sys_id: &str) -> String {
        format!(
            "{}/api/now/table/{}/{}",
            self.base_url(),
            table,
            urlencoding::encode(sys_id)
        )
    }

    fn attachment_list_url(&self) -> String {
        format!("{}/api/now/attachment", self.base_url())
    }

    fn attachment_file_url(&self, attachment_id: &str) -> String {
        format!(
            "{}/api/now/attachment/{}/file",
            self.base_url(),
            urlencoding::encode(attachment_id)
        )
    }

    /// Encoded query selecting the group's open tickets, oldest first.
    fn queue_query(&self) -> String {
        format!(
            "assignment_group.name={}^active=true^ORDERBYopened_at",
            self.config.assignment_group
        )
    }

    fn queue_fields(&self) -> String {
        let mut fields: Vec<&str> = BASE_FIELDS.to_vec();
        fields.push(&self.config.message_guid_field);
        fields.join(",")
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header("Accept", "application/json")
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, RequestError> {
        let response = self
            .authed(request)
            .send()
            .await
            .map_err(RequestError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(RequestError::Status(status, snippet));
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, RequestError> {
        let response = self.send(request).await?;
        let body = response.text().await.map_err(RequestError::from_reqwest)?;
        serde_json::from_str(&body).map_err(|e| RequestError::Parse(e.to_string()))
    }

    /// Fetch the open tickets of one table.
    async fn poll_table(&self, table: &str, kind: TicketKind) -> Result<Vec<Ticket>, RequestError> {
        let limit = self.config.batch_size.to_string();
        let request = self.client.get(self.table_url(table)).query(&[
            ("sysparm_query", self.queue_query().as_str()),
            ("sysparm_fields", self.queue_fields().as_str()),
            ("sysparm_limit", limit.as_str()),
            ("sysparm_display_value", "true"),
            ("sysparm_exclude_reference_link", "true"),
        ]);

        let rows: ResultList<RecordRow> = self.get_json(request).await?;
        let mut tickets = Vec::with_capacity(rows.result.len());
        for row in rows.result {
            let attachment = self.first_attachment(table, &row.sys_id).await?;
            tickets.push(row_to_ticket(
                row,
                kind,
                &self.config.message_guid_field,
                attachment,
            ));
        }
        Ok(tickets)
    }

    /// Look up the first attachment on a record.
    async fn first_attachment(
        &self,
        table: &str,
        sys_id: &str,
    ) -> Result<Option<AttachmentRef>, RequestError> {
        let query = format!("table_name={}^table_sys_id={}^ORDERBYsys_created_on", table, sys_id);
        let request = self.client.get(self.attachment_list_url()).query(&[
            ("sysparm_query", query.as_str()),
            ("sysparm_limit", "1"),
        ]);

        let rows: ResultList<AttachmentRow> = self.get_json(request).await?;
        Ok(rows.result.into_iter().next().map(row_to_attachment))
    }

    fn state_for(&self, outcome: TicketOutcome) -> Option<&str> {
        let states = &self.config.states;
        match outcome {
            TicketOutcome::Released => states.released.as_deref(),
            TicketOutcome::Rejected => states.rejected.as_deref(),
            TicketOutcome::Skipped => states.skipped.as_deref(),
            TicketOutcome::Failed => states.failed.as_deref(),
        }
    }
}

fn row_to_ticket(
    row: RecordRow,
    kind: TicketKind,
    guid_field: &str,
    attachment: Option<AttachmentRef>,
) -> Ticket {
    let requester = row.requester();
    let message_guid = row.extra_text(guid_field);
    let opened_at = row.opened_at();

    Ticket {
        id: row.sys_id,
        number: row.number,
        kind,
        short_description: row.short_description.unwrap_or_default(),
        description: row.description.unwrap_or_default(),
        requester,
        attachment,
        justification_text: None,
        message_guid,
        status: TicketStatus::New,
        opened_at,
    }
}

fn row_to_attachment(row: AttachmentRow) -> AttachmentRef {
    AttachmentRef {
        id: row.sys_id,
        file_name: row.file_name,
        content_type: row.content_type.filter(|c| !c.is_empty()),
        size_bytes: row.size_bytes.and_then(|s| s.trim().parse().ok()),
    }
}

#[async_trait]
impl TicketSource for ServiceNowClient {
    fn name(&self) -> &str {
        "servicenow"
    }

    async fn poll(&self) -> Result<Vec<Ticket>, SourceError> {
        let start = Instant::now();
        let mut tickets = Vec::new();

        let mut outcome: Result<(), SourceError> = Ok(());
        for table in &self.config.tables {
            let Some(kind) = TicketKind::from_table(table) else {
                warn!(table = %table, "Skipping unsupported ServiceNow table");
                continue;
            };
            match self.poll_table(table, kind).await {
                Ok(found) => {
                    debug!(table = %table, count = found.len(), "Polled ServiceNow table");
                    tickets.extend(found);
                }
                Err(e) => {
                    outcome = Err(e.into());
                    break;
                }
            }
        }

        metrics::observe_external(
            "servicenow",
            "poll",
            start.elapsed().as_secs_f64(),
            outcome.is_ok(),
        );
        outcome.map(|_| tickets)
    }
}

#[async_trait]
impl TicketUpdater for ServiceNowClient {
    fn name(&self) -> &str {
        "servicenow"
    }

    async fn update(&self, update: &TicketUpdate) -> Result<(), UpdateError> {
        let start = Instant::now();
        let patch = RecordPatch {
            work_notes: &update.detail,
            state: self.state_for(update.outcome),
        };
        let request = self
            .client
            .patch(self.record_url(update.kind.table(), &update.ticket_id))
            .json(&patch);

        let result = self.send(request).await.map(|_| ());

        metrics::observe_external(
            "servicenow",
            "update",
            start.elapsed().as_secs_f64(),
            result.is_ok(),
        );
        if result.is_ok() {
            debug!(
                ticket_id = %update.ticket_id,
                outcome = update.outcome.as_str(),
                "Recorded outcome on ticket"
            );
        }
        result.map_err(UpdateError::from)
    }
}

#[async_trait]
impl AttachmentFetcher for ServiceNowClient {
    async fn fetch(
        &self,
        ticket: &Ticket,
        attachment: &AttachmentRef,
    ) -> Result<Vec<u8>, InspectionError> {
        let start = Instant::now();
        debug!(
            ticket = %ticket.number,
            file = %attachment.file_name,
            "Downloading attachment"
        );

        let result: Result<Vec<u8>, RequestError> = async {
            let response = self
                .send(self.client.get(self.attachment_file_url(&attachment.id)))
                .await?;
            let bytes = response.bytes().await.map_err(RequestError::from_reqwest)?;
            Ok(bytes.to_vec())
        }
        .await;

        metrics::observe_external(
            "servicenow",
            "attachment",
            start.elapsed().as_secs_f64(),
            result.is_ok(),
        );
        result.map_err(InspectionError::from)
    }
}
