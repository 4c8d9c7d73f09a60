pub mod auth;
pub mod bus;
pub mod cache;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod friends;
pub mod groups;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod sessions;
pub mod users;

use std::sync::Arc;

use rocket_cors::CorsOptions;

use auth::{CaptchaStore, LoginGuard};
use bus::{Broker, HandlerTable, LocalBroker, PubSub, RedisBroker};
use cache::Cache;
use chat::ChatEngine;
use config::Config;
use db::Db;
use friends::FriendEngine;
use groups::GroupEngine;
use rate_limit::{RateLimitConfig, RateLimiter};
use sessions::SessionRouter;
use users::UserEngine;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let config = Config::from_env().expect("invalid configuration");
    build_rocket(config)
}

/// Build against a specific database file (tests use throwaway paths).
pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    let mut config = Config::from_env().expect("invalid configuration");
    config.database_path = db_path.to_string();
    build_rocket(config)
}

fn build_rocket(config: Config) -> rocket::Rocket<rocket::Build> {
    // Ensure data directory exists
    if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    // Explicit dependency wiring: one store handle, one cache, the engines
    // on top. No globals.
    let db = Arc::new(Db::new(&config.database_path));
    let cache = Arc::new(Cache::new(&config.server_name));
    let chat = Arc::new(ChatEngine::new(db.clone(), cache.clone()));
    let users = Arc::new(UserEngine::new(db.clone(), cache.clone()));
    let friends = Arc::new(FriendEngine::new(db.clone(), cache.clone(), chat.clone()));
    let groups = Arc::new(GroupEngine::new(db, cache, users.clone()));

    let session_router = SessionRouter::new();
    let mut handlers = HandlerTable::new();
    routes::register_handlers(&mut handlers, session_router.clone());

    let broker: Arc<dyn Broker> = if config.broker.addrs.is_empty() {
        Arc::new(LocalBroker::new())
    } else {
        Arc::new(RedisBroker::new(&config.broker.url()).expect("invalid broker configuration"))
    };
    let pubsub = Arc::new(PubSub::new(broker, handlers));

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    let subscriber = pubsub.clone();
    rocket::build()
        .manage(config)
        .manage(chat)
        .manage(users)
        .manage(friends)
        .manage(groups)
        .manage(session_router)
        .manage(pubsub)
        .manage(CaptchaStore::new())
        .manage(LoginGuard::new())
        .manage(RateLimiter::new())
        .manage(RateLimitConfig::from_env())
        .attach(cors)
        .register(
            "/",
            rocket::catchers![
                routes::not_found,
                routes::bad_request,
                routes::unprocessable
            ],
        )
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::register,
                routes::login,
                routes::logout,
                routes::captcha,
                routes::captcha_post,
                routes::profile_info,
                routes::ws_connect,
                routes::send_message,
                routes::rollback_message,
                routes::delete_message,
                routes::last_messages,
                routes::find_friend,
                routes::update_friend,
                routes::add_invite,
                routes::update_invite,
                routes::create_group,
                routes::join_group,
                routes::leave_group,
                routes::update_group,
                routes::add_group_members,
                routes::update_group_member,
                routes::remove_group_members,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Bus Subscriber",
            move |_rocket| {
                Box::pin(async move {
                    match subscriber.start().await {
                        Ok(()) => log::info!("bus subscriber started"),
                        Err(err) => log::error!("bus subscriber failed to start: {err}"),
                    }
                })
            },
        ))
}
