//! Built-in smoke checks run by `--self-test`.
//!
//! Each check builds what it needs in memory; nothing touches the
//! configured storage or the configured listener.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use echelon::password::{hash_password, verify_password};
use echelon::rank::{MAX_RANK, points_required_for_rank, rank_from_points};
use echelon::{Echelon, EchelonConfig, EchelonServer, generate_join_token};
use echelon_protocol::{Request, Response, TankAttributes, UserLevel, Variant};
use echelon_store::{LogNotifier, MemoryDatabase, MemoryMapStore};
use echelon_transport::PeerAddresses;
use tokio::sync::watch;

type CheckResult = Result<(), String>;

fn ensure(condition: bool, message: &str) -> CheckResult {
    if condition {
        Ok(())
    } else {
        Err(message.to_string())
    }
}

fn check_passwords() -> CheckResult {
    let hash = hash_password("correct horse");
    ensure(verify_password("correct horse", &hash), "fresh hash does not verify")?;
    ensure(!verify_password("wrong horse", &hash), "wrong password verifies")?;
    ensure(hash != hash_password("correct horse"), "salts repeat")
}

fn check_ranks() -> CheckResult {
    ensure(rank_from_points(0) == 0, "zero points is not rank 0")?;
    for rank in [1, 5, MAX_RANK] {
        let needed = points_required_for_rank(rank);
        ensure(rank_from_points(needed) == rank, "rank threshold does not round trip")?;
        ensure(rank_from_points(needed - 1) == rank - 1, "rank reached one point early")?;
    }
    Ok(())
}

fn check_tokens() -> CheckResult {
    let a = generate_join_token();
    let b = generate_join_token();
    ensure(a.len() == 32, "join token is not 128 bits of hex")?;
    ensure(a.chars().all(|c| c.is_ascii_hexdigit()), "join token is not hex")?;
    ensure(a != b, "join tokens repeat")
}

/// Logs a player in, selects a tank, and logs out again.
async fn check_player_round_trip() -> CheckResult {
    let database = Arc::new(MemoryDatabase::new());
    database
        .insert_account("selftest", &hash_password("pw"), UserLevel::MEMBER)
        .await;
    database
        .insert_tank(
            "selftest",
            TankAttributes {
                name: "selftestTank".into(),
                weapon_id: 1,
                speed_factor: 1.0,
                armor_factor: 1.0,
                color: 0,
                points: 0,
            },
        )
        .await;
    let echelon = Echelon::new(
        EchelonConfig::default(),
        database,
        Arc::new(MemoryMapStore::new()),
        Arc::new(LogNotifier),
    );

    let loopback = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    let session = echelon
        .gateway()
        .login(Variant::Player, "selftest", "pw", PeerAddresses::new(loopback, loopback))
        .await
        .map_err(|e| format!("login failed: {e}"))?;

    let tanks = echelon
        .dispatch(session.id, Request::GetTankList)
        .await
        .map_err(|e| format!("tank list failed: {e}"))?;
    ensure(
        matches!(&tanks, Response::Tanks { tanks } if tanks.len() == 1),
        "tank list is wrong",
    )?;

    echelon
        .dispatch(
            session.id,
            Request::SelectTank {
                tank_name: "selftestTank".into(),
            },
        )
        .await
        .map_err(|e| format!("select tank failed: {e}"))?;
    echelon
        .dispatch(session.id, Request::Logout)
        .await
        .map_err(|e| format!("logout failed: {e}"))?;
    ensure(
        echelon.registry().get(session.id).await.is_none(),
        "session survived logout",
    )?;

    let denied = echelon
        .gateway()
        .login(Variant::Admin, "selftest", "pw", PeerAddresses::new(loopback, loopback))
        .await;
    ensure(denied.is_err(), "a member logged in as admin")
}

/// Binds a server on an ephemeral port and stops it.
async fn check_listener() -> CheckResult {
    let server = EchelonServer::builder()
        .bind("127.0.0.1:0")
        .build(
            Arc::new(MemoryDatabase::new()),
            Arc::new(MemoryMapStore::new()),
            Arc::new(LogNotifier),
        )
        .await
        .map_err(|e| format!("bind failed: {e}"))?;

    let (stop, stop_rx) = watch::channel(false);
    let running = tokio::spawn(server.run_until(stop_rx));
    let _ = stop.send(true);

    match tokio::time::timeout(Duration::from_secs(5), running).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(format!("server failed: {e}")),
        Ok(Err(e)) => Err(format!("server task panicked: {e}")),
        Err(_) => Err("server did not stop".to_string()),
    }
}

/// Runs every check and logs each outcome. Returns `true` if all passed.
pub async fn run_all() -> bool {
    let results: Vec<(&str, CheckResult)> = vec![
        ("passwords", check_passwords()),
        ("ranks", check_ranks()),
        ("join tokens", check_tokens()),
        ("player round trip", check_player_round_trip().await),
        ("listener", check_listener().await),
    ];

    let mut passed = true;
    for (name, result) in results {
        match result {
            Ok(()) => tracing::info!(check = name, "self-test passed"),
            Err(reason) => {
                tracing::error!(check = name, %reason, "self-test failed");
                passed = false;
            }
        }
    }
    passed
}
