use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use itemshare::clock::ManualClock;
use itemshare::engine::Engine;
use itemshare::model::UserId;
use itemshare::wire;

const T0: i64 = 1_700_000_000_000;
const H: i64 = 3_600_000;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<ManualClock>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("itemshare_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let engine = Arc::new(Engine::new(dir.join("itemshare.wal"), clock.clone()).unwrap());

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "itemshare".to_string(), None).await;
            });
        }
    });

    (addr, clock)
}

async fn connect_as(addr: SocketAddr, user: &str) -> Result<Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("itemshare")
        .user(user)
        .password("itemshare");

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

/// Connect as a fresh user and register them.
async fn register(addr: SocketAddr, name: &str) -> (Client, UserId) {
    let id = UserId::generate();
    let client = connect_as(addr, &id.to_string()).await.unwrap();
    let rows = query(
        &client,
        &format!("INSERT INTO users (name, email) VALUES ('{name}', '{name}@example.com')"),
    )
    .await;
    assert_eq!(rows[0].get("id"), Some(id.to_string().as_str()));
    (client, id)
}

async fn query(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn error_code(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.as_db_error()
        .map(|db| db.code().code().to_string())
        .unwrap_or_default()
}

fn col(row: &SimpleQueryRow, name: &str) -> String {
    row.get(name).unwrap_or_default().to_string()
}

async fn list_drill(owner: &Client) -> String {
    let rows = query(
        owner,
        "INSERT INTO items (name, description, available) VALUES ('Drill', 'cordless drill', true)",
    )
    .await;
    col(&rows[0], "id")
}

async fn request(booker: &Client, item: &str, start: i64, end: i64) -> String {
    let rows = query(
        booker,
        &format!(r#"INSERT INTO bookings (item_id, start, "end") VALUES ('{item}', {start}, {end})"#),
    )
    .await;
    assert_eq!(col(&rows[0], "status"), "WAITING");
    col(&rows[0], "id")
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_lifecycle_over_the_wire() {
    let (addr, _clock) = start_test_server().await;
    let (owner, _) = register(addr, "owner").await;
    let (booker, booker_id) = register(addr, "booker").await;

    let item = list_drill(&owner).await;
    let booking = request(&booker, &item, T0 + H, T0 + 2 * H).await;

    let rows = query(
        &owner,
        &format!("UPDATE bookings SET approved = true WHERE id = '{booking}'"),
    )
    .await;
    assert_eq!(col(&rows[0], "status"), "APPROVED");
    assert_eq!(col(&rows[0], "booker_id"), booker_id.to_string());
    assert_eq!(col(&rows[0], "item_name"), "Drill");

    // A decision is final.
    let code = error_code(
        &owner,
        &format!("UPDATE bookings SET approved = false WHERE id = '{booking}'"),
    )
    .await;
    assert_eq!(code, "22023");

    let future = query(&booker, "SELECT * FROM bookings WHERE state = 'FUTURE'").await;
    assert_eq!(future.len(), 1);
    assert_eq!(col(&future[0], "id"), booking);
    assert!(query(&booker, "SELECT * FROM bookings WHERE state = 'PAST'").await.is_empty());

    let owned = query(&owner, "SELECT * FROM owner_bookings WHERE state = 'ALL'").await;
    assert_eq!(owned.len(), 1);
}

#[tokio::test]
async fn owner_sees_next_booking_on_item() {
    let (addr, _clock) = start_test_server().await;
    let (owner, _) = register(addr, "owner").await;
    let (booker, booker_id) = register(addr, "booker").await;

    let item = list_drill(&owner).await;
    let booking = request(&booker, &item, T0 + H, T0 + 2 * H).await;
    query(
        &owner,
        &format!("UPDATE bookings SET approved = true WHERE id = '{booking}'"),
    )
    .await;

    let as_owner = query(&owner, &format!("SELECT * FROM items WHERE id = '{item}'")).await;
    assert_eq!(col(&as_owner[0], "next_booking_id"), booking);
    assert_eq!(col(&as_owner[0], "next_booker_id"), booker_id.to_string());
    assert_eq!(as_owner[0].get("last_booking_id"), None);

    let as_booker = query(&booker, &format!("SELECT * FROM items WHERE id = '{item}'")).await;
    assert_eq!(as_booker[0].get("next_booking_id"), None);
    assert_eq!(col(&as_booker[0], "name"), "Drill");
}

#[tokio::test]
async fn comments_need_a_finished_booking() {
    let (addr, clock) = start_test_server().await;
    let (owner, _) = register(addr, "owner").await;
    let (booker, _) = register(addr, "booker").await;

    let item = list_drill(&owner).await;
    let booking = request(&booker, &item, T0 + H, T0 + 2 * H).await;
    query(
        &owner,
        &format!("UPDATE bookings SET approved = true WHERE id = '{booking}'"),
    )
    .await;

    let comment = format!("INSERT INTO comments (item_id, text) VALUES ('{item}', 'solid drill')");
    assert_eq!(error_code(&booker, &comment).await, "22023");

    clock.set(T0 + 3 * H);
    let rows = query(&booker, &comment).await;
    assert_eq!(col(&rows[0], "author_name"), "booker");

    let listed = query(&owner, &format!("SELECT * FROM comments WHERE item_id = '{item}'")).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(col(&listed[0], "text"), "solid drill");
}

#[tokio::test]
async fn requests_are_answered_by_listing_items() {
    let (addr, _clock) = start_test_server().await;
    let (asker, asker_id) = register(addr, "asker").await;
    let (owner, owner_id) = register(addr, "owner").await;

    let rows = query(&asker, "INSERT INTO requests (description) VALUES ('a tall ladder')").await;
    let request = col(&rows[0], "id");
    assert_eq!(col(&rows[0], "requester_id"), asker_id.to_string());
    assert_eq!(rows[0].get("items"), None);

    let seen = query(&owner, "SELECT * FROM all_requests").await;
    assert_eq!(seen.len(), 1);
    assert_eq!(col(&seen[0], "id"), request);
    assert!(query(&asker, "SELECT * FROM all_requests").await.is_empty());

    let rows = query(
        &owner,
        &format!(
            "INSERT INTO items (name, description, available, request_id) VALUES ('Ladder', '3m', true, '{request}')"
        ),
    )
    .await;
    let ladder = col(&rows[0], "id");
    assert_eq!(col(&rows[0], "request_id"), request);

    let own = query(&asker, "SELECT * FROM requests").await;
    assert_eq!(own.len(), 1);
    let items: serde_json::Value = serde_json::from_str(&col(&own[0], "items")).unwrap();
    assert_eq!(items[0]["id"], ladder.as_str());
    assert_eq!(items[0]["name"], "Ladder");
    assert_eq!(items[0]["owner"], owner_id.to_string().as_str());

    let by_id = query(&owner, &format!("SELECT * FROM requests WHERE id = '{request}'")).await;
    assert_eq!(col(&by_id[0], "description"), "a tall ladder");

    let missing = Ulid::new();
    let code = error_code(
        &owner,
        &format!("INSERT INTO items VALUES ('Saw', 'hand saw', true, '{missing}')"),
    )
    .await;
    assert_eq!(code, "P0002");
}

#[tokio::test]
async fn errors_carry_sqlstates() {
    let (addr, _clock) = start_test_server().await;
    let (owner, _) = register(addr, "owner").await;
    let (booker, _) = register(addr, "booker").await;
    let item = list_drill(&owner).await;

    let missing = Ulid::new();
    let code = error_code(
        &booker,
        &format!(r#"INSERT INTO bookings (item_id, start, "end") VALUES ('{missing}', {}, {})"#, T0 + H, T0 + 2 * H),
    )
    .await;
    assert_eq!(code, "P0002");

    // End before start.
    let code = error_code(
        &booker,
        &format!(r#"INSERT INTO bookings (item_id, start, "end") VALUES ('{item}', {}, {})"#, T0 + 2 * H, T0 + H),
    )
    .await;
    assert_eq!(code, "22023");

    // Only the owner may decide.
    let booking = request(&booker, &item, T0 + H, T0 + 2 * H).await;
    let code = error_code(
        &booker,
        &format!("UPDATE bookings SET approved = true WHERE id = '{booking}'"),
    )
    .await;
    assert_eq!(code, "P0002");

    assert_eq!(error_code(&booker, "SELECT * FROM bookings WHERE state = 'SOON'").await, "22023");
    assert_eq!(error_code(&booker, "SELEKT nothing").await, "42601");
    assert_eq!(error_code(&booker, "SELECT * FROM warehouses").await, "42601");
}

#[tokio::test]
async fn bound_parameters_keep_placeholder_text() {
    let (addr, _clock) = start_test_server().await;
    let id = UserId::generate();
    let client = connect_as(addr, &id.to_string()).await.unwrap();

    let rows = client
        .query(
            "INSERT INTO users (name, email) VALUES ($1, $2)",
            &[&"O'Brien", &"ann$1@example.com"],
        )
        .await
        .unwrap();
    assert_eq!(rows[0].get::<_, &str>("name"), "O'Brien");
    assert_eq!(rows[0].get::<_, &str>("email"), "ann$1@example.com");

    let listed = query(&client, &format!("SELECT * FROM users WHERE id = '{id}'")).await;
    assert_eq!(col(&listed[0], "email"), "ann$1@example.com");
}

#[tokio::test]
async fn login_name_must_be_a_user_id() {
    let (addr, _clock) = start_test_server().await;
    let err = connect_as(addr, "postgres").await.err().unwrap();
    assert_eq!(
        err.as_db_error().map(|db| db.code().code().to_string()),
        Some("28000".to_string())
    );
}

#[tokio::test]
async fn unregistered_identity_cannot_list_items() {
    let (addr, _clock) = start_test_server().await;
    let stranger = connect_as(addr, &UserId::generate().to_string()).await.unwrap();
    let code = error_code(
        &stranger,
        "INSERT INTO items (name, description, available) VALUES ('Saw', 'hand saw', true)",
    )
    .await;
    assert_eq!(code, "P0002");
}
