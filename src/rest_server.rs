use crate::config::Config;
use crate::dashboard::SnapshotReceiver;
use crate::models::Snapshot;
use log::info;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::response::content::RawHtml;
use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::tokio::select;
use rocket::{get, routes, Build, Rocket, Shutdown, State};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// CORS Fairing for Rocket
pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _req: &'r rocket::Request<'_>, res: &mut rocket::Response<'r>) {
        res.set_header(rocket::http::Header::new("Access-Control-Allow-Origin", "*"));
        res.set_header(rocket::http::Header::new("Access-Control-Allow-Methods", "GET"));
        res.set_header(rocket::http::Header::new(
            "Access-Control-Allow-Headers",
            "Content-Type",
        ));
    }
}

/// The dashboard page
#[get("/")]
fn index() -> RawHtml<&'static str> {
    RawHtml(INDEX_HTML)
}

/// Latest snapshot as JSON
#[get("/api/snapshot")]
fn snapshot(snapshots: &State<SnapshotReceiver>) -> Json<Snapshot> {
    Json(snapshots.borrow().clone())
}

/// Plain-text rendering of the message list
#[get("/view")]
fn text_view(snapshots: &State<SnapshotReceiver>) -> String {
    snapshots.borrow().text.clone()
}

/// Pushes the current snapshot, then one per change, until shutdown.
#[get("/events")]
fn events(snapshots: &State<SnapshotReceiver>, mut shutdown: Shutdown) -> EventStream![] {
    let mut rx = snapshots.inner().clone();
    EventStream! {
        loop {
            let current = rx.borrow_and_update().clone();
            yield Event::json(&current);

            select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = &mut shutdown => break,
            }
        }
    }
}

pub fn build_rocket(config: &Config, snapshots: SnapshotReceiver) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("address", config.dashboard_address))
        .merge(("port", config.dashboard_port));

    rocket::custom(figment)
        .manage(snapshots)
        .mount("/", routes![index, snapshot, text_view, events])
        .attach(Cors)
}

/// Run the Rocket server until it is shut down (Ctrl-C).
pub async fn run_rest_server(config: &Config, snapshots: SnapshotReceiver) -> Result<(), rocket::Error> {
    info!(
        "Dashboard listening on http://{}:{}",
        config.dashboard_address, config.dashboard_port
    );
    build_rocket(config, snapshots).launch().await?;
    info!("Dashboard web server stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::tests::test_config;
    use crate::dashboard::{channels, Dashboard};
    use crate::models::{ConnectionState, DashboardEvent, Message};
    use crate::view::{CONNECTED_BANNER, EMPTY_PLACEHOLDER};
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;

    async fn client_for(dashboard: &Dashboard) -> Client {
        let config = test_config("device-1/#");
        let (_events, _event_rx, _snapshot_tx, snapshot_rx) = channels(dashboard);
        Client::tracked(build_rocket(&config, snapshot_rx))
            .await
            .expect("valid rocket instance")
    }

    #[tokio::test]
    async fn index_serves_dashboard_page() {
        let dashboard = Dashboard::new(&test_config("device-1/#"));
        let client = client_for(&dashboard).await;

        let response = client.get("/").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.content_type(), Some(ContentType::HTML));
        assert_eq!(
            response.headers().get_one("Access-Control-Allow-Origin"),
            Some("*")
        );
        let body = response.into_string().await.unwrap();
        assert!(body.contains("EventSource"));
    }

    #[tokio::test]
    async fn empty_dashboard_view_shows_placeholder() {
        let dashboard = Dashboard::new(&test_config("device-1/#"));
        let client = client_for(&dashboard).await;

        let body = client.get("/view").dispatch().await.into_string().await.unwrap();
        assert!(body.contains(EMPTY_PLACEHOLDER));
    }

    #[tokio::test]
    async fn snapshot_reflects_received_messages() {
        let mut dashboard = Dashboard::new(&test_config("device-1/#"));
        dashboard.apply(DashboardEvent::ConnectionChanged(ConnectionState::Connected));
        dashboard.apply(DashboardEvent::MessageReceived(Message::new("device-1/a", "payload_a")));
        dashboard.apply(DashboardEvent::MessageReceived(Message::new("device-1/b", "payload_b")));
        let client = client_for(&dashboard).await;

        let response = client.get("/api/snapshot").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let json: serde_json::Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(json["connection"]["state"], "connected");
        assert_eq!(json["topic"], "device-1/#");
        assert_eq!(json["messages"][0]["topic"], "device-1/b");
        assert_eq!(json["messages"][1]["topic"], "device-1/a");

        let text = client.get("/view").dispatch().await.into_string().await.unwrap();
        assert!(text.starts_with(CONNECTED_BANNER));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let dashboard = Dashboard::new(&test_config("device-1/#"));
        let client = client_for(&dashboard).await;
        assert_eq!(client.get("/clear").dispatch().await.status(), Status::NotFound);
    }
}
