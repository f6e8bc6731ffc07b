use anyhow::anyhow;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{ConversationId, SubconversationId, UserId},
    error::NetworkFailure,
    protocol::{
        ConversationResponse, CreateConversationRequest, ErrorBody, GroupGuard, GroupInfoResponse,
        MemberChangeRequest, MemberChangeResponse, SubconversationResponse,
    },
};
use url::Url;

/// `ConversationGateway` over the backend's REST surface.
pub struct HttpConversationGateway {
    http: Client,
    base: Url,
}

impl HttpConversationGateway {
    pub fn new(base: Url) -> Self {
        Self {
            http: Client::new(),
            base,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, NetworkFailure> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| NetworkFailure::NoConnection(anyhow!("base url cannot hold a path")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, NetworkFailure> {
        let response = self.http.get(url).send().await.map_err(connection)?;
        decode_json(check_status(response).await?).await
    }

    async fn group_info(&self, url: Url) -> Result<Vec<u8>, NetworkFailure> {
        let body: GroupInfoResponse = self.get_json(url).await?;
        STANDARD
            .decode(body.group_info_b64)
            .map_err(|err| invalid_payload(StatusCode::OK, err))
    }
}

#[async_trait]
impl crate::gateway::ConversationGateway for HttpConversationGateway {
    async fn fetch_conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<ConversationResponse, NetworkFailure> {
        let url = self.endpoint(&["conversations", &conversation.domain, &conversation.value])?;
        self.get_json(url).await
    }

    async fn fetch_group_info(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<u8>, NetworkFailure> {
        let url = self.endpoint(&[
            "conversations",
            &conversation.domain,
            &conversation.value,
            "group-info",
        ])?;
        self.group_info(url).await
    }

    async fn fetch_subconversation_details(
        &self,
        conversation: &ConversationId,
        subconversation: &SubconversationId,
    ) -> Result<SubconversationResponse, NetworkFailure> {
        let url = self.endpoint(&[
            "conversations",
            &conversation.domain,
            &conversation.value,
            "subconversations",
            subconversation.as_str(),
        ])?;
        self.get_json(url).await
    }

    async fn fetch_subconversation_group_info(
        &self,
        conversation: &ConversationId,
        subconversation: &SubconversationId,
    ) -> Result<Vec<u8>, NetworkFailure> {
        let url = self.endpoint(&[
            "conversations",
            &conversation.domain,
            &conversation.value,
            "subconversations",
            subconversation.as_str(),
            "group-info",
        ])?;
        self.group_info(url).await
    }

    async fn delete_subconversation(
        &self,
        conversation: &ConversationId,
        subconversation: &SubconversationId,
        guard: &GroupGuard,
    ) -> Result<(), NetworkFailure> {
        let url = self.endpoint(&[
            "conversations",
            &conversation.domain,
            &conversation.value,
            "subconversations",
            subconversation.as_str(),
        ])?;
        let response = send_json(self.http.delete(url), guard).await?;
        check_status(response).await.map(|_| ())
    }

    async fn leave_subconversation(
        &self,
        conversation: &ConversationId,
        subconversation: &SubconversationId,
    ) -> Result<(), NetworkFailure> {
        let url = self.endpoint(&[
            "conversations",
            &conversation.domain,
            &conversation.value,
            "subconversations",
            subconversation.as_str(),
            "self",
        ])?;
        let response = self.http.delete(url).send().await.map_err(connection)?;
        check_status(response).await.map(|_| ())
    }

    async fn reset_conversation(
        &self,
        conversation: &ConversationId,
        guard: &GroupGuard,
    ) -> Result<(), NetworkFailure> {
        let url = self.endpoint(&[
            "conversations",
            &conversation.domain,
            &conversation.value,
            "reset",
        ])?;
        let response = send_json(self.http.post(url), guard).await?;
        check_status(response).await.map(|_| ())
    }

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<ConversationResponse, NetworkFailure> {
        let url = self.endpoint(&["conversations"])?;
        let response = send_json(self.http.post(url), request).await?;
        decode_json(check_status(response).await?).await
    }

    async fn add_member(
        &self,
        conversation: &ConversationId,
        users: &[UserId],
    ) -> Result<MemberChangeResponse, NetworkFailure> {
        let url = self.endpoint(&[
            "conversations",
            &conversation.domain,
            &conversation.value,
            "members",
        ])?;
        let body = MemberChangeRequest {
            users: users.to_vec(),
        };
        let response = send_json(self.http.post(url), &body).await?;
        decode_json(check_status(response).await?).await
    }

    async fn remove_member(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<MemberChangeResponse, NetworkFailure> {
        let url = self.endpoint(&[
            "conversations",
            &conversation.domain,
            &conversation.value,
            "members",
            &user.domain,
            &user.value,
        ])?;
        let response = self.http.delete(url).send().await.map_err(connection)?;
        decode_json(check_status(response).await?).await
    }
}

async fn send_json<B: Serialize>(
    builder: reqwest::RequestBuilder,
    body: &B,
) -> Result<Response, NetworkFailure> {
    builder.json(body).send().await.map_err(connection)
}

/// Maps non-2xx responses onto the failure taxonomy via the backend's
/// `{code, label, message}` error body.
async fn check_status(response: Response) -> Result<Response, NetworkFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let failure = match response.json::<ErrorBody>().await {
        Ok(body) => NetworkFailure::from_server_error(status.as_u16(), &body.label, &body.message),
        Err(_) => NetworkFailure::ServerError {
            status: status.as_u16(),
            label: String::new(),
            message: status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string(),
        },
    };
    Err(failure)
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, NetworkFailure> {
    let status = response.status();
    response
        .json()
        .await
        .map_err(|err| invalid_payload(status, err))
}

fn connection(err: reqwest::Error) -> NetworkFailure {
    NetworkFailure::NoConnection(err.into())
}

fn invalid_payload(status: StatusCode, err: impl std::error::Error) -> NetworkFailure {
    NetworkFailure::ServerError {
        status: status.as_u16(),
        label: "invalid-payload".to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
