//! The authenticated forum session.
//!
//! [`Transport`] is the seam between the connector logic and the wire:
//! the connector is generic over it, so tests drive the whole pipeline
//! with a scripted transport and production uses [`HttpTransport`].

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Endpoints;
use crate::encoding::ajax_encode;
use crate::error::{Error, Result};

/// One authenticated HTTP conversation with the forum.
///
/// Every method is a full request/response exchange; implementations
/// must serialize exchanges so only one is in flight per session.
pub trait Transport: Send + Sync {
    /// Establishes a fresh authenticated session, discarding any
    /// previous one.
    fn login(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Fetches the chatbox message listing.
    fn fetch_messages_page(&self) -> impl Future<Output = Result<String>> + Send;

    /// Fetches a computationally cheap page carrying the security
    /// token.
    fn fetch_cheap_page(&self) -> impl Future<Output = Result<String>> + Send;

    /// Fetches the smiley listing page.
    fn fetch_smilies_page(&self) -> impl Future<Output = Result<String>> + Send;

    /// Posts a new chatbox message; `encoded_body` is already encoded
    /// for the wire.
    fn submit_post(
        &self,
        security_token: &str,
        encoded_body: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Edits an existing chatbox message.
    fn submit_edit(
        &self,
        security_token: &str,
        message_id: u64,
        encoded_body: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Performs an AJAX operation and returns the raw response body.
    fn ajax(
        &self,
        security_token: &str,
        operation: &str,
        parameters: &[(&str, &str)],
    ) -> impl Future<Output = Result<String>> + Send;
}

/// The character set legacy forum software serves pages in.
const SERVER_CHARSET: &str = "windows-1252";

/// [`Transport`] over reqwest with a cookie jar.
///
/// A single mutex guards the client: it is held for the duration of
/// each request/response pair, so the poll loop and outbound actions
/// never interleave exchanges on the shared session. Login swaps in a
/// fresh client, which also empties the cookie jar.
pub struct HttpTransport {
    client: Mutex<reqwest::Client>,
    endpoints: Endpoints,
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport for the given endpoints.
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Mutex::new(build_client(timeout)?),
            endpoints,
            timeout,
        })
    }

    async fn get_page(&self, url: &str) -> Result<String> {
        let client = self.client.lock().await;
        let response = client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Rejected(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }
        Ok(response.text_with_charset(SERVER_CHARSET).await?)
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .cookie_store(true)
        .timeout(timeout)
        .build()?)
}

impl Transport for HttpTransport {
    async fn login(&self, username: &str, password: &str) -> Result<()> {
        debug!(username, "logging in");
        let mut client = self.client.lock().await;
        // Fresh client, fresh cookie jar.
        *client = build_client(self.timeout)?;

        let response = client
            .post(&self.endpoints.login)
            .form(&[
                ("vb_login_username", username),
                ("vb_login_password", password),
                ("cookieuser", "1"),
                ("s", ""),
                ("do", "login"),
                ("vb_login_md5password", ""),
                ("vb_login_md5password_utf", ""),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Login(format!(
                "login form returned {}",
                response.status()
            )));
        }
        // Drain the body; the session lives in the cookies.
        let _ = response.text_with_charset(SERVER_CHARSET).await?;
        Ok(())
    }

    async fn fetch_messages_page(&self) -> Result<String> {
        self.get_page(&self.endpoints.messages).await
    }

    async fn fetch_cheap_page(&self) -> Result<String> {
        self.get_page(&self.endpoints.cheap_page).await
    }

    async fn fetch_smilies_page(&self) -> Result<String> {
        self.get_page(&self.endpoints.smilies).await
    }

    async fn submit_post(&self, security_token: &str, encoded_body: &str) -> Result<()> {
        let body =
            format!("do=cb_postnew&securitytoken={security_token}&vsacb_newmessage={encoded_body}");
        let client = self.client.lock().await;
        let response = client
            .post(&self.endpoints.post_edit)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text_with_charset(SERVER_CHARSET).await?;
        // The post endpoint answers an empty 200 on success; any body
        // is an error page.
        if !status.is_success() || !text.is_empty() {
            return Err(Error::Rejected(format!("post returned {status}")));
        }
        Ok(())
    }

    async fn submit_edit(
        &self,
        security_token: &str,
        message_id: u64,
        encoded_body: &str,
    ) -> Result<()> {
        let body = format!(
            "do=vsacb_editmessage&s=&securitytoken={security_token}&id={message_id}&vsacb_editmessage={encoded_body}"
        );
        let client = self.client.lock().await;
        let response = client
            .post(&self.endpoints.post_edit)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Rejected(format!(
                "edit returned {}",
                response.status()
            )));
        }
        let _ = response.text_with_charset(SERVER_CHARSET).await?;
        Ok(())
    }

    async fn ajax(
        &self,
        security_token: &str,
        operation: &str,
        parameters: &[(&str, &str)],
    ) -> Result<String> {
        let mut pieces = vec![
            format!("securitytoken={}", ajax_encode(security_token)),
            format!("do={}", ajax_encode(operation)),
        ];
        for (key, value) in parameters {
            pieces.push(format!("{}={}", ajax_encode(key), ajax_encode(value)));
        }
        let body = pieces.join("&");

        let client = self.client.lock().await;
        let response = client
            .post(&self.endpoints.ajax)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text_with_charset(SERVER_CHARSET).await?;
        if !status.is_success() || text.is_empty() {
            return Err(Error::Rejected(format!("ajax {operation} returned {status}")));
        }
        Ok(text)
    }
}
