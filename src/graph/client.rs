use crate::error::SourceError;
use crate::graph::auth::TokenProvider;
use crate::index::document::IndexDocument;
use crate::sync::config::SourceConfig;
use crate::sync::domain::Domain;
use crate::sync::ledger::ObjectKind;
use crate::sync::source::{ObjectSource, SourceObject, TimeWindow};
use crate::sync::util::truncate_with_ellipsis;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde_json::Value;
use std::thread;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 45;
const TRANSIENT_RETRIES: usize = 2;
/// Hard stop for `@odata.nextLink` chains so a misbehaving endpoint
/// cannot page forever.
const MAX_PAGES: usize = 500;

/// Blocking client for the Graph-style collaboration-suite API. Fetches
/// are flattened into `SourceObject`s carrying hierarchy linkage; kinds
/// with indexable content also carry a mapped document.
pub struct GraphClient {
    http: Client,
    base_url: String,
    page_size: u64,
    auth: TokenProvider,
}

fn str_field(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl GraphClient {
    pub fn from_config(cfg: &SourceConfig) -> Result<Self> {
        if cfg.tenant_id.trim().is_empty() || cfg.client_id.trim().is_empty() {
            anyhow::bail!(
                "source credentials are not configured (GRAPHSYNC_TENANT_ID / GRAPHSYNC_CLIENT_ID)"
            );
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build source HTTP client")?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            page_size: cfg.page_size,
            auth: TokenProvider::from_config(cfg),
        })
    }

    fn get_once(&self, url: &str) -> Result<Value> {
        let token = self.auth.token(&self.http)?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .with_context(|| format!("failed to GET {url}"))?;

        let status = response.status().as_u16();
        if status == 401 {
            return Err(SourceError::AuthExpired.into());
        }
        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(2);
            return Err(SourceError::RateLimited { retry_after_secs }.into());
        }
        if !(200..300).contains(&status) {
            let body = response.text().unwrap_or_default();
            return Err(SourceError::Http {
                status,
                body: truncate_with_ellipsis(&body, 300),
            }
            .into());
        }

        response
            .json::<Value>()
            .with_context(|| format!("invalid JSON from {url}"))
    }

    /// GET with a refresh-and-retry-once on expired tokens and a short
    /// linear backoff on transient statuses.
    fn get_value(&self, url: &str) -> Result<Value> {
        let mut refreshed = false;
        let mut attempt = 0usize;

        loop {
            let err = match self.get_once(url) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err.downcast_ref::<SourceError>() {
                Some(SourceError::AuthExpired) if !refreshed => {
                    self.auth.invalidate();
                    refreshed = true;
                }
                Some(SourceError::RateLimited { retry_after_secs })
                    if attempt < TRANSIENT_RETRIES =>
                {
                    thread::sleep(Duration::from_secs(*retry_after_secs));
                    attempt += 1;
                }
                Some(SourceError::Http { status, .. })
                    if *status >= 500 && attempt < TRANSIENT_RETRIES =>
                {
                    let delay_ms = 250 * (attempt + 1) as u64;
                    thread::sleep(Duration::from_millis(delay_ms));
                    attempt += 1;
                }
                _ => return Err(err),
            }
        }
    }

    /// Follow `@odata.nextLink` pages, accumulating the `value` arrays.
    fn get_paged(&self, first_url: String) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        let mut url = Some(first_url);
        let mut pages = 0usize;

        while let Some(current) = url {
            if pages >= MAX_PAGES {
                anyhow::bail!("pagination exceeded {MAX_PAGES} pages at {current}");
            }
            pages += 1;

            let page = self.get_value(&current)?;
            if let Some(items) = page.get("value").and_then(Value::as_array) {
                out.extend(items.iter().cloned());
            }
            url = page
                .get("@odata.nextLink")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned);
        }

        Ok(out)
    }

    fn windowed_url(&self, path: &str, window: &TimeWindow) -> String {
        format!(
            "{}{path}?$top={}&$filter=lastModifiedDateTime%20ge%20{}%20and%20lastModifiedDateTime%20le%20{}",
            self.base_url,
            self.page_size,
            window.start_iso(),
            window.end_iso()
        )
    }

    fn listing_url(&self, path: &str) -> String {
        format!("{}{path}?$top={}", self.base_url, self.page_size)
    }

    fn message_document(raw: &Value, id: &str, kind: ObjectKind) -> IndexDocument {
        let sender = raw
            .pointer("/from/user/displayName")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let subject = str_field(raw, "subject");
        IndexDocument::new(id, kind)
            .title(if subject.is_empty() {
                sender.to_string()
            } else {
                subject
            })
            .body(
                raw.pointer("/body/content")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
            )
            .url(str_field(raw, "webUrl"))
            .last_updated(
                raw.get("lastModifiedDateTime")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
            )
    }

    fn fetch_channel_files(
        &self,
        team_id: &str,
        channel_id: &str,
        out: &mut Vec<SourceObject>,
    ) -> Result<()> {
        let folder_url = format!(
            "{}/v1.0/teams/{team_id}/channels/{channel_id}/filesFolder",
            self.base_url
        );
        let folder = self.get_value(&folder_url)?;
        let folder_id = str_field(&folder, "id");
        let drive_id = folder
            .pointer("/parentReference/driveId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if folder_id.is_empty() || drive_id.is_empty() {
            return Ok(());
        }

        out.push(SourceObject::container(
            drive_id.clone(),
            ObjectKind::ChannelDrive,
            channel_id,
            team_id,
        ));
        out.push(SourceObject::container(
            folder_id.clone(),
            ObjectKind::ChannelRoot,
            &drive_id,
            channel_id,
        ));

        let children = self.get_paged(self.listing_url(&format!(
            "/v1.0/drives/{drive_id}/items/{folder_id}/children"
        )))?;
        for item in children {
            let item_id = str_field(&item, "id");
            if item_id.is_empty() {
                continue;
            }
            if item.get("folder").is_some() {
                // Nested folders are tracked as containers only.
                out.push(SourceObject::container(
                    item_id,
                    ObjectKind::ChannelDriveItem,
                    &folder_id,
                    &drive_id,
                ));
                continue;
            }
            let document = IndexDocument::new(&item_id, ObjectKind::ChannelDocument)
                .title(str_field(&item, "name"))
                .url(str_field(&item, "webUrl"))
                .last_updated(
                    item.get("lastModifiedDateTime")
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned),
                );
            out.push(SourceObject {
                id: item_id,
                kind: ObjectKind::ChannelDocument,
                parent_id: folder_id.clone(),
                super_parent_id: drive_id.clone(),
                document: Some(document),
            });
        }

        Ok(())
    }

    fn fetch_teams(&self, window: &TimeWindow) -> Result<Vec<SourceObject>> {
        let mut out = Vec::new();

        let teams = self.get_paged(self.listing_url("/v1.0/teams"))?;
        for team in teams {
            let team_id = str_field(&team, "id");
            if team_id.is_empty() {
                continue;
            }
            let team_doc = IndexDocument::new(&team_id, ObjectKind::Team)
                .title(str_field(&team, "displayName"))
                .body(str_field(&team, "description"));
            out.push(SourceObject {
                id: team_id.clone(),
                kind: ObjectKind::Team,
                parent_id: String::new(),
                super_parent_id: String::new(),
                document: Some(team_doc),
            });

            let channels =
                self.get_paged(self.listing_url(&format!("/v1.0/teams/{team_id}/channels")))?;
            for channel in channels {
                let channel_id = str_field(&channel, "id");
                if channel_id.is_empty() {
                    continue;
                }
                let channel_doc = IndexDocument::new(&channel_id, ObjectKind::Channel)
                    .title(str_field(&channel, "displayName"))
                    .body(str_field(&channel, "description"))
                    .url(str_field(&channel, "webUrl"));
                out.push(SourceObject {
                    id: channel_id.clone(),
                    kind: ObjectKind::Channel,
                    parent_id: team_id.clone(),
                    super_parent_id: String::new(),
                    document: Some(channel_doc),
                });

                let messages = self.get_paged(self.windowed_url(
                    &format!("/v1.0/teams/{team_id}/channels/{channel_id}/messages"),
                    window,
                ))?;
                for message in messages {
                    let message_id = str_field(&message, "id");
                    if message_id.is_empty() {
                        continue;
                    }
                    out.push(SourceObject {
                        id: message_id.clone(),
                        kind: ObjectKind::ChannelMessage,
                        parent_id: channel_id.clone(),
                        super_parent_id: team_id.clone(),
                        document: Some(Self::message_document(
                            &message,
                            &message_id,
                            ObjectKind::ChannelMessage,
                        )),
                    });
                }

                let tabs = self.get_paged(self.listing_url(&format!(
                    "/v1.0/teams/{team_id}/channels/{channel_id}/tabs"
                )))?;
                for tab in tabs {
                    let tab_id = str_field(&tab, "id");
                    if tab_id.is_empty() {
                        continue;
                    }
                    let tab_doc = IndexDocument::new(&tab_id, ObjectKind::ChannelTab)
                        .title(str_field(&tab, "displayName"))
                        .url(str_field(&tab, "webUrl"));
                    out.push(SourceObject {
                        id: tab_id,
                        kind: ObjectKind::ChannelTab,
                        parent_id: channel_id.clone(),
                        super_parent_id: team_id.clone(),
                        document: Some(tab_doc),
                    });
                }

                self.fetch_channel_files(&team_id, &channel_id, &mut out)?;
            }
        }

        Ok(out)
    }

    fn fetch_user_chats(&self, window: &TimeWindow) -> Result<Vec<SourceObject>> {
        let mut out = Vec::new();

        let chats = self.get_paged(self.listing_url("/v1.0/chats"))?;
        for chat in chats {
            let chat_id = str_field(&chat, "id");
            if chat_id.is_empty() {
                continue;
            }
            out.push(SourceObject::container(
                chat_id.clone(),
                ObjectKind::Chat,
                "",
                "",
            ));

            let messages = self
                .get_paged(self.windowed_url(&format!("/v1.0/chats/{chat_id}/messages"), window))?;
            for message in messages {
                let message_id = str_field(&message, "id");
                if message_id.is_empty() {
                    continue;
                }
                out.push(SourceObject {
                    id: message_id.clone(),
                    kind: ObjectKind::UserChatMessage,
                    parent_id: chat_id.clone(),
                    super_parent_id: String::new(),
                    document: Some(Self::message_document(
                        &message,
                        &message_id,
                        ObjectKind::UserChatMessage,
                    )),
                });

                let attachments = message
                    .get("attachments")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for attachment in attachments {
                    let attachment_id = str_field(&attachment, "id");
                    if attachment_id.is_empty() {
                        continue;
                    }
                    let doc = IndexDocument::new(&attachment_id, ObjectKind::UserChatAttachment)
                        .title(str_field(&attachment, "name"))
                        .url(str_field(&attachment, "contentUrl"));
                    out.push(SourceObject {
                        id: attachment_id,
                        kind: ObjectKind::UserChatAttachment,
                        parent_id: message_id.clone(),
                        super_parent_id: chat_id.clone(),
                        document: Some(doc),
                    });
                }
            }

            let tabs = self.get_paged(self.listing_url(&format!("/v1.0/chats/{chat_id}/tabs")))?;
            for tab in tabs {
                let tab_id = str_field(&tab, "id");
                if tab_id.is_empty() {
                    continue;
                }
                let tab_doc = IndexDocument::new(&tab_id, ObjectKind::UserChatTab)
                    .title(str_field(&tab, "displayName"))
                    .url(str_field(&tab, "webUrl"));
                out.push(SourceObject {
                    id: tab_id,
                    kind: ObjectKind::UserChatTab,
                    parent_id: chat_id.clone(),
                    super_parent_id: String::new(),
                    document: Some(tab_doc),
                });
            }
        }

        Ok(out)
    }

    fn fetch_calendar(&self, window: &TimeWindow) -> Result<Vec<SourceObject>> {
        let mut out = Vec::new();

        let users = self.get_paged(self.listing_url("/v1.0/users"))?;
        for user in users {
            let user_id = str_field(&user, "id");
            if user_id.is_empty() {
                continue;
            }
            out.push(SourceObject::container(
                user_id.clone(),
                ObjectKind::User,
                "",
                "",
            ));

            let events = self
                .get_paged(self.windowed_url(&format!("/v1.0/users/{user_id}/events"), window))?;
            for event in events {
                let event_id = str_field(&event, "id");
                if event_id.is_empty() {
                    continue;
                }
                let doc = IndexDocument::new(&event_id, ObjectKind::Meeting)
                    .title(str_field(&event, "subject"))
                    .body(
                        event
                            .pointer("/body/content")
                            .and_then(Value::as_str)
                            .unwrap_or_default(),
                    )
                    .url(str_field(&event, "webLink"))
                    .last_updated(
                        event
                            .get("lastModifiedDateTime")
                            .and_then(Value::as_str)
                            .map(ToOwned::to_owned),
                    );
                out.push(SourceObject {
                    id: event_id,
                    kind: ObjectKind::Meeting,
                    parent_id: user_id.clone(),
                    super_parent_id: String::new(),
                    document: Some(doc),
                });
            }
        }

        Ok(out)
    }
}

impl ObjectSource for GraphClient {
    fn fetch_objects(&self, domain: Domain, window: &TimeWindow) -> Result<Vec<SourceObject>> {
        match domain {
            Domain::Teams => self.fetch_teams(window),
            Domain::UserChats => self.fetch_user_chats(window),
            Domain::Calendar => self.fetch_calendar(window),
        }
    }
}
