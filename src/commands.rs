//! Command implementations for the dicechain CLI

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::info;

use dicechain::config::{Config, ConfigError};
use dicechain::crypto::{Identity, PeerKey};
use dicechain::gaming::{GameSession, Orchestrator, SessionSnapshot};
use dicechain::transport::{LocalRelay, ReliableChannel};
use dicechain::{Error, Result};

/// How often an automatic player checks whether it is on turn
const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub fn keygen() {
    let identity = Identity::generate();
    println!("secret key:  {}", identity.secret_hex());
    println!("public key:  {}", identity.peer_key().to_hex());
    println!("fingerprint: {}", identity.fingerprint());
}

pub fn fingerprint(public_key: &str) -> Result<()> {
    let key = PeerKey::from_hex(public_key)?;
    println!("{}", key.fingerprint());
    Ok(())
}

/// Build a channel to everybody in `roster` except `identity`, plus the
/// public keys of those peers.
fn channel_for(
    identity: &Identity,
    roster: &[PeerKey],
    config: &Config,
) -> (ReliableChannel, Vec<PeerKey>) {
    let me = identity.fingerprint();
    let peers: Vec<PeerKey> = roster.iter().filter(|k| k.fingerprint() != me).cloned().collect();
    let recipients = peers.iter().map(|k| k.fingerprint().to_hex()).collect();
    let channel = ReliableChannel::new(me.to_hex(), recipients, config.transport.retry.schedule());
    (channel, peers)
}

/// Play every session to the end concurrently.
async fn play_all(sessions: Vec<Arc<GameSession>>) -> Result<()> {
    let mut tasks = JoinSet::new();
    for session in sessions {
        tasks.spawn(async move { session.autoplay(POLL_INTERVAL).await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.map_err(|e| Error::Task(e.to_string()))??;
    }
    Ok(())
}

fn print_standings(snapshot: &SessionSnapshot) {
    let Some(game) = &snapshot.game else {
        println!("no game state");
        return;
    };
    println!("{:<10} {:>6} {:>6} {:>6} {:>6}", "player", "upper", "bonus", "lower", "total");
    for (player, totals) in game.standings() {
        println!(
            "{:<10} {:>6} {:>6} {:>6} {:>6}",
            player.short(),
            totals.upper_points,
            totals.bonus,
            totals.lower_total,
            totals.total
        );
    }
}

pub async fn simulate(config: &Config, players: usize, drop_rate: f64, seed: u64) -> Result<()> {
    let relay = if drop_rate > 0.0 {
        LocalRelay::with_drop_rate(drop_rate, seed)
    } else {
        LocalRelay::new()
    };
    let identities: Vec<Identity> = (0..players).map(|_| Identity::generate()).collect();
    let roster: Vec<PeerKey> = identities.iter().map(|i| i.peer_key().clone()).collect();
    info!(players, drop_rate, label = %config.game.label, "starting simulated game");

    let mut sessions = Vec::with_capacity(players);
    for identity in &identities {
        let (channel, peers) = channel_for(identity, &roster, config);
        let (link, inbound) = relay.connect(channel.local_id())?;
        channel.attach(Some(link));
        channel.spawn_inbound(inbound);

        let orchestrator = Orchestrator::new(identity.clone(), peers, &config.game.label, channel)?;
        sessions.push(Arc::new(GameSession::start(orchestrator)?));
    }

    play_all(sessions.clone()).await?;

    let reference = sessions[0].snapshot();
    for session in &sessions[1..] {
        if session.snapshot().game != reference.game {
            return Err(Error::Task("replicas finished with different states".to_string()));
        }
    }
    let (forwarded, dropped) = relay.counters();
    info!(generations = reference.generations, forwarded, dropped, "game finished");
    print_standings(&reference);
    Ok(())
}

#[cfg(feature = "ws-client")]
pub async fn play(config: &Config, secret_key: &str, peers: &[String]) -> Result<()> {
    use dicechain::transport::ws_client;

    let identity = Identity::from_secret_hex(secret_key)?;
    let mut roster = vec![identity.peer_key().clone()];
    for peer in peers {
        roster.push(PeerKey::from_hex(peer)?);
    }
    if roster.len() < 2 {
        return Err(ConfigError::Invalid("at least one peer is required".to_string()).into());
    }

    let (channel, peers) = channel_for(&identity, &roster, config);
    ws_client::connect(&config.transport.relay_url, &channel).await?;
    info!(fingerprint = %identity.fingerprint().short(), "joined relay");

    let orchestrator = Orchestrator::new(identity, peers, &config.game.label, channel)?;
    let session = Arc::new(GameSession::start(orchestrator)?);
    play_all(vec![Arc::clone(&session)]).await?;
    print_standings(&session.snapshot());
    Ok(())
}

pub fn check_drop_rate(rate: f64) -> Result<f64> {
    crate::app_config::parse_drop_rate(rate).map_err(|e| ConfigError::Invalid(e).into())
}
