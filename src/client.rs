use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use ulid::Ulid;

use crate::engine::{Engine, EngineError, ErrorBody};
use crate::model::*;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The partner/guest operations a front end needs from the backend.
///
/// Implemented over HTTP by [`HttpBackend`] and in-process by [`Engine`],
/// so dashboards can be driven against either.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_rooms(&self, partner_id: Ulid) -> Result<Vec<Room>, EngineError>;
    async fn create_room(&self, new: NewRoom) -> Result<Room, EngineError>;
    async fn update_room(&self, id: Ulid, details: RoomDetails) -> Result<Room, EngineError>;
    async fn delete_room(&self, id: Ulid) -> Result<(), EngineError>;
    async fn set_room_status(&self, id: Ulid, status: RoomStatus) -> Result<Room, EngineError>;

    async fn list_bookings(&self, partner_id: Ulid) -> Result<Vec<Booking>, EngineError>;
    async fn create_booking(&self, new: NewBooking) -> Result<Booking, EngineError>;
    async fn update_booking(&self, id: Ulid, update: BookingUpdate)
        -> Result<Booking, EngineError>;
    async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError>;

    async fn request_booking(&self, req: GuestRequest) -> Result<Booking, EngineError>;
    async fn guest_bookings(&self, phone: &str) -> Result<Vec<Booking>, EngineError>;
}

fn network(e: reqwest::Error) -> EngineError {
    EngineError::Network(e.to_string())
}

/// JSON-over-HTTP client for the staydesk API.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self, EngineError> {
        let base = Url::parse(base_url)
            .map_err(|e| EngineError::validation("base_url", e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(EngineError::validation("base_url", "not a base URL"));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(network)?;
        Ok(Self { client, base })
    }

    /// Base URL plus percent-encoded path segments.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.client.request(method, self.url(segments))
    }

    /// Send and turn non-2xx replies back into the error they describe.
    async fn send(&self, req: RequestBuilder) -> Result<Response, EngineError> {
        let resp = req.send().await.map_err(network)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let code = status.as_u16();
        match resp.json::<ErrorBody>().await {
            Ok(body) => Err(EngineError::from_body(code, body)),
            Err(_) => Err(EngineError::Network(format!(
                "{code} {}",
                status.canonical_reason().unwrap_or("unexpected status")
            ))),
        }
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, EngineError> {
        let resp = self.send(self.request(Method::GET, segments)).await?;
        resp.json().await.map_err(network)
    }

    async fn with_body<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
    ) -> Result<T, EngineError> {
        let resp = self.send(self.request(method, segments).json(body)).await?;
        resp.json().await.map_err(network)
    }

    /// Guest-facing view of one room on `day`.
    pub async fn room_view(&self, room_id: Ulid, day: Day) -> Result<RoomView, EngineError> {
        let req = self
            .request(Method::GET, &["rooms", &room_id.to_string()])
            .query(&[("day", day.to_string())]);
        let resp = self.send(req).await?;
        resp.json().await.map_err(network)
    }

    pub async fn free_windows(
        &self,
        room_id: Ulid,
        from: Day,
        to: Day,
    ) -> Result<Vec<Stay>, EngineError> {
        let req = self
            .request(Method::GET, &["rooms", &room_id.to_string(), "availability"])
            .query(&[("from", from.to_string()), ("to", to.to_string())]);
        let resp = self.send(req).await?;
        resp.json().await.map_err(network)
    }

    pub async fn health(&self) -> Result<(), EngineError> {
        self.send(self.request(Method::GET, &["health"])).await.map(|_| ())
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_rooms(&self, partner_id: Ulid) -> Result<Vec<Room>, EngineError> {
        self.get(&["partners", "rooms", &partner_id.to_string()]).await
    }

    async fn create_room(&self, new: NewRoom) -> Result<Room, EngineError> {
        self.with_body(Method::POST, &["partners", "rooms"], &new).await
    }

    async fn update_room(&self, id: Ulid, details: RoomDetails) -> Result<Room, EngineError> {
        self.with_body(Method::PUT, &["partners", "rooms", &id.to_string()], &details)
            .await
    }

    async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let req = self.request(Method::DELETE, &["partners", "rooms", &id.to_string()]);
        self.send(req).await.map(|_| ())
    }

    async fn set_room_status(&self, id: Ulid, status: RoomStatus) -> Result<Room, EngineError> {
        self.with_body(
            Method::PATCH,
            &["partners", "rooms", &id.to_string(), "status"],
            &StatusBody { status },
        )
        .await
    }

    async fn list_bookings(&self, partner_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        self.get(&["partners", "bookings", &partner_id.to_string()]).await
    }

    async fn create_booking(&self, new: NewBooking) -> Result<Booking, EngineError> {
        self.with_body(Method::POST, &["partners", "bookings"], &new).await
    }

    async fn update_booking(
        &self,
        id: Ulid,
        update: BookingUpdate,
    ) -> Result<Booking, EngineError> {
        self.with_body(Method::PUT, &["partners", "bookings", &id.to_string()], &update)
            .await
    }

    async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        self.with_body(
            Method::PUT,
            &["partners", "bookings", &id.to_string(), "status"],
            &StatusBody { status },
        )
        .await
    }

    async fn request_booking(&self, req: GuestRequest) -> Result<Booking, EngineError> {
        self.with_body(Method::POST, &["bookings"], &req).await
    }

    async fn guest_bookings(&self, phone: &str) -> Result<Vec<Booking>, EngineError> {
        self.get(&["bookings", "user", phone]).await
    }
}

#[async_trait]
impl Backend for Engine {
    async fn list_rooms(&self, partner_id: Ulid) -> Result<Vec<Room>, EngineError> {
        Ok(Engine::list_rooms(self, partner_id).await)
    }

    async fn create_room(&self, new: NewRoom) -> Result<Room, EngineError> {
        Engine::create_room(self, new).await
    }

    async fn update_room(&self, id: Ulid, details: RoomDetails) -> Result<Room, EngineError> {
        Engine::update_room(self, id, details).await
    }

    async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        Engine::delete_room(self, id).await
    }

    async fn set_room_status(&self, id: Ulid, status: RoomStatus) -> Result<Room, EngineError> {
        Engine::set_room_status(self, id, status).await
    }

    async fn list_bookings(&self, partner_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        Ok(Engine::list_bookings(self, partner_id).await)
    }

    async fn create_booking(&self, new: NewBooking) -> Result<Booking, EngineError> {
        Engine::create_booking(self, new).await
    }

    async fn update_booking(
        &self,
        id: Ulid,
        update: BookingUpdate,
    ) -> Result<Booking, EngineError> {
        Engine::update_booking(self, id, update).await
    }

    async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        Engine::set_booking_status(self, id, status).await
    }

    async fn request_booking(&self, req: GuestRequest) -> Result<Booking, EngineError> {
        Engine::request_booking(self, req).await
    }

    async fn guest_bookings(&self, phone: &str) -> Result<Vec<Booking>, EngineError> {
        Engine::guest_bookings(self, phone).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_joined_and_encoded() {
        let backend = HttpBackend::new("http://localhost:8080/api/").unwrap();
        let url = backend.url(&["bookings", "user", "+1 555 0100"]);
        assert_eq!(url.as_str(), "http://localhost:8080/api/bookings/user/+1%20555%200100");

        let backend = HttpBackend::new("http://localhost:8080").unwrap();
        assert_eq!(backend.url(&["health"]).as_str(), "http://localhost:8080/health");
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(HttpBackend::new("mailto:ops@example.com").is_err());
        assert!(HttpBackend::new("not a url").is_err());
    }

    #[tokio::test]
    async fn unreachable_backend_is_network_error() {
        let backend = HttpBackend::new("http://127.0.0.1:1").unwrap();
        let result = backend.list_rooms(Ulid::new()).await;
        assert!(matches!(result, Err(EngineError::Network(_))));
    }
}
