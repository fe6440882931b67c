//! Puzzle site HTTP client
//!
//! Two endpoints: input download and answer submission. Both authenticate
//! with the session cookie and send the configured user agent.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, USER_AGENT};
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::config::Config;
use crate::puzzle::PuzzleCoordinate;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Authentication failed (HTTP 400). The session token is missing or expired.")]
    Authentication,
    #[error("Puzzle not found (HTTP 404). Check the year and day; puzzles unlock at midnight EST.")]
    PuzzleNotFound,
    #[error("Puzzle site returned HTTP {status}")]
    Server { status: u16 },
    #[error("Downloaded puzzle input is empty")]
    EmptyInput,
    #[error("Invalid session token header: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Map a response status to the error it signals, if any
pub fn check_status(status: StatusCode) -> Result<(), ClientError> {
    match status {
        StatusCode::BAD_REQUEST => Err(ClientError::Authentication),
        StatusCode::NOT_FOUND => Err(ClientError::PuzzleNotFound),
        s if s.is_success() => Ok(()),
        s => Err(ClientError::Server { status: s.as_u16() }),
    }
}

/// The two remote operations the workflows depend on
#[async_trait]
pub trait PuzzleSite: Send + Sync {
    async fn fetch_input(&self, year: u16, day: u8) -> Result<String, ClientError>;
    async fn submit_answer(
        &self,
        coordinate: &PuzzleCoordinate,
        answer: &str,
    ) -> Result<String, ClientError>;
}

pub struct AocClient {
    base_url: String,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl AocClient {
    pub fn new(base_url: &str, session_token: &str, user_agent: &str) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let mut cookie = HeaderValue::from_str(&format!("session={}", session_token))?;
        cookie.set_sensitive(true);
        headers.insert(COOKIE, cookie);
        headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
            client: reqwest::Client::new(),
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let token = config.require_session_token()?;
        Ok(Self::new(&config.base_url, token, &config.user_agent)?)
    }

    fn day_url(&self, year: u16, day: u8, endpoint: &str) -> String {
        format!("{}/{}/day/{}/{}", self.base_url, year, day, endpoint)
    }

    /// Download the puzzle input; the result is trimmed and never empty
    pub async fn fetch_input(&self, year: u16, day: u8) -> Result<String, ClientError> {
        let url = self.day_url(year, day, "input");
        info!("Downloading input for {} day {}", year, day);

        let response = self
            .client
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .await?;
        check_status(response.status())?;

        let body = response.text().await?;
        let input = body.trim();
        if input.is_empty() {
            return Err(ClientError::EmptyInput);
        }
        Ok(input.to_string())
    }

    /// Post an answer and return the raw HTML response body
    pub async fn submit_answer(
        &self,
        coordinate: &PuzzleCoordinate,
        answer: &str,
    ) -> Result<String, ClientError> {
        let url = self.day_url(coordinate.year, coordinate.day, "answer");
        let level = coordinate.level.to_string();
        debug!("Submitting {} for {}", answer, coordinate);

        // `form` sets the urlencoded content type
        let response = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .form(&[("level", level.as_str()), ("answer", answer)])
            .send()
            .await?;
        check_status(response.status())?;

        Ok(response.text().await?)
    }
}

#[async_trait]
impl PuzzleSite for AocClient {
    async fn fetch_input(&self, year: u16, day: u8) -> Result<String, ClientError> {
        AocClient::fetch_input(self, year, day).await
    }

    async fn submit_answer(
        &self,
        coordinate: &PuzzleCoordinate,
        answer: &str,
    ) -> Result<String, ClientError> {
        AocClient::submit_answer(self, coordinate, answer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(check_status(StatusCode::OK).is_ok());
        assert!(matches!(
            check_status(StatusCode::BAD_REQUEST),
            Err(ClientError::Authentication)
        ));
        assert!(matches!(
            check_status(StatusCode::NOT_FOUND),
            Err(ClientError::PuzzleNotFound)
        ));
        assert!(matches!(
            check_status(StatusCode::INTERNAL_SERVER_ERROR),
            Err(ClientError::Server { status: 500 })
        ));
        assert!(matches!(
            check_status(StatusCode::FOUND),
            Err(ClientError::Server { status: 302 })
        ));
    }

    #[test]
    fn test_day_urls() {
        let client = AocClient::new("https://adventofcode.com/", "abc", "aoc-test").unwrap();
        assert_eq!(
            client.day_url(2023, 5, "input"),
            "https://adventofcode.com/2023/day/5/input"
        );
        assert_eq!(
            client.day_url(2023, 12, "answer"),
            "https://adventofcode.com/2023/day/12/answer"
        );
    }

    #[test]
    fn test_session_cookie_header() {
        let client = AocClient::new("https://adventofcode.com", "abc123", "aoc-test").unwrap();
        assert_eq!(client.headers[COOKIE], "session=abc123");
        assert!(client.headers[COOKIE].is_sensitive());
        assert_eq!(client.headers[USER_AGENT], "aoc-test");
    }

    #[test]
    fn test_token_with_newline_is_rejected() {
        let result = AocClient::new("https://adventofcode.com", "abc\n", "aoc-test");
        assert!(matches!(result, Err(ClientError::InvalidHeader(_))));
    }
}
