//! Mutual authentication and capability negotiation.
//!
//! After the preamble the initiator sends its signed entry, the responder
//! challenges it with a random cookie and checks the signature against the
//! entry's key, then the same happens the other way round. Finally both
//! sides trade `:ap` capabilities and pick a compression algorithm.

use dfi_shared::capabilities::{choose_compression, Capabilities};
use dfi_shared::identity::verify_signature;
use dfi_shared::protocol::Blob;
use dfi_shared::{Address, Entry, Identity, Message, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::connection::{Connection, SessionState};
use crate::error::{NetError, Result};

const COOKIE_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    /// The remote's verified entry.
    pub entry: Entry,
    pub capabilities: Capabilities,
    pub compression: String,
}

/// Dial side. When `expected` is set the responder must prove it owns that
/// address.
pub async fn initiate<S>(
    conn: &mut Connection<S>,
    identity: &Identity,
    local: &Entry,
    capabilities: &Capabilities,
    expected: Option<&Address>,
) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    conn.write_preamble().await?;
    conn.send(Message::with_content(Tag::Header, local)?).await?;
    conn.set_state(SessionState::HandshakeSent);

    answer_cookie(conn, identity).await?;

    let remote: Entry = conn.recv_tag(Tag::Header).await?.read()?;
    remote
        .verify()
        .map_err(|e| NetError::Handshake(format!("responder entry invalid: {e}")))?;
    if let Some(expected) = expected {
        if &remote.address != expected {
            return Err(NetError::Handshake(format!(
                "expected {}, reached {}",
                expected.short(),
                remote.address.short()
            )));
        }
    }

    challenge(conn, &remote).await?;

    conn.send(Message::with_content(Tag::Capabilities, capabilities)?)
        .await?;
    let theirs: Capabilities = conn.recv_tag(Tag::Capabilities).await?.read()?;
    conn.set_state(SessionState::CapabilitiesExchanged);

    let compression = choose_compression(capabilities, &theirs);
    conn.open(compression.clone());
    debug!(peer = %remote.address.short(), compression = %compression, "session open");

    Ok(HandshakeOutcome {
        entry: remote,
        capabilities: theirs,
        compression,
    })
}

/// Accept side. Failures the initiator could act on are answered with `no`
/// before the error is returned.
pub async fn respond<S>(
    conn: &mut Connection<S>,
    identity: &Identity,
    local: &Entry,
    capabilities: &Capabilities,
) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match respond_inner(conn, identity, local, capabilities).await {
        Err(e) if !matches!(e, NetError::Io(_) | NetError::Closed | NetError::Timeout(_)) => {
            let _ = conn.send(Message::no(&e.to_string())).await;
            Err(e)
        }
        other => other,
    }
}

async fn respond_inner<S>(
    conn: &mut Connection<S>,
    identity: &Identity,
    local: &Entry,
    capabilities: &Capabilities,
) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    conn.read_preamble().await?;

    let remote: Entry = conn.recv_tag(Tag::Header).await?.read()?;
    conn.set_state(SessionState::HandshakeSent);
    remote
        .verify()
        .map_err(|e| NetError::Handshake(format!("initiator entry invalid: {e}")))?;

    challenge(conn, &remote).await?;

    conn.send(Message::with_content(Tag::Header, local)?).await?;
    answer_cookie(conn, identity).await?;

    let theirs: Capabilities = conn.recv_tag(Tag::Capabilities).await?.read()?;
    conn.send(Message::with_content(Tag::Capabilities, capabilities)?)
        .await?;
    conn.set_state(SessionState::CapabilitiesExchanged);

    let compression = choose_compression(&theirs, capabilities);
    conn.open(compression.clone());
    debug!(peer = %remote.address.short(), compression = %compression, "session accepted");

    Ok(HandshakeOutcome {
        entry: remote,
        capabilities: theirs,
        compression,
    })
}

/// Send a fresh cookie and check the remote signs it with its entry's key.
async fn challenge<S>(conn: &mut Connection<S>, remote: &Entry) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut cookie = vec![0u8; COOKIE_SIZE];
    OsRng.fill_bytes(&mut cookie);
    conn.send(Message::with_content(Tag::Cookie, &Blob(cookie.clone()))?)
        .await?;

    let sig: Blob = conn.recv_tag(Tag::Sig).await?.read()?;
    verify_signature(&remote.public_key, &cookie, &sig.0)
        .map_err(|_| NetError::Handshake("cookie signature does not match entry".into()))
}

async fn answer_cookie<S>(conn: &mut Connection<S>, identity: &Identity) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let cookie: Blob = conn.recv_tag(Tag::Cookie).await?.read()?;
    if cookie.0.len() != COOKIE_SIZE {
        return Err(NetError::Handshake(format!(
            "cookie must be {COOKIE_SIZE} bytes, got {}",
            cookie.0.len()
        )));
    }
    let sig = identity.sign(&cookie.0).to_bytes().to_vec();
    conn.send(Message::with_content(Tag::Sig, &Blob(sig))?).await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    pub(crate) fn node(name: &str, port: u16) -> (Identity, Entry) {
        let identity = Identity::generate();
        let mut entry = Entry {
            name: name.into(),
            public_address: "127.0.0.1".into(),
            port,
            collection_hash: vec![0u8; 32],
            ..Default::default()
        };
        entry.sign(&identity);
        (identity, entry)
    }

    fn pair() -> (Connection<DuplexStream>, Connection<DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (Connection::new(a), Connection::new(b))
    }

    #[tokio::test]
    async fn both_sides_authenticate() {
        let (mut client, mut server) = pair();
        let (client_id, client_entry) = node("client", 1);
        let (server_id, server_entry) = node("server", 2);
        let expected = server_entry.address.clone();

        let accept = tokio::spawn(async move {
            let outcome = respond(&mut server, &server_id, &server_entry, &Capabilities::default())
                .await
                .unwrap();
            assert_eq!(server.state(), SessionState::Open);
            outcome
        });

        let outcome = initiate(
            &mut client,
            &client_id,
            &client_entry,
            &Capabilities::default(),
            Some(&expected),
        )
        .await
        .unwrap();
        let accepted = accept.await.unwrap();

        assert_eq!(outcome.entry.address, expected);
        assert_eq!(accepted.entry, client_entry);
        assert_eq!(outcome.compression, "gzip");
        assert_eq!(accepted.compression, "gzip");
        assert_eq!(client.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn no_shared_compression_is_plain() {
        let (mut client, mut server) = pair();
        let (client_id, client_entry) = node("client", 1);
        let (server_id, server_entry) = node("server", 2);

        let accept = tokio::spawn(async move {
            respond(&mut server, &server_id, &server_entry, &Capabilities::default()).await
        });
        let outcome = initiate(&mut client, &client_id, &client_entry, &Capabilities::none(), None)
            .await
            .unwrap();

        assert_eq!(outcome.compression, "");
        assert_eq!(accept.await.unwrap().unwrap().compression, "");
    }

    #[tokio::test]
    async fn forged_entry_rejected() {
        let (mut client, mut server) = pair();
        let (_, victim) = node("victim", 1);
        let impostor = Identity::generate();
        let (server_id, server_entry) = node("server", 2);

        let accept = tokio::spawn(async move {
            respond(&mut server, &server_id, &server_entry, &Capabilities::default()).await
        });

        // a copied entry is valid on its own, but the cookie is signed with
        // the wrong key
        let result = initiate(&mut client, &impostor, &victim, &Capabilities::default(), None).await;
        assert!(matches!(result, Err(NetError::Rejected(_))));
        assert!(matches!(accept.await.unwrap(), Err(NetError::Handshake(_))));
    }

    #[tokio::test]
    async fn wrong_responder_rejected() {
        let (mut client, mut server) = pair();
        let (client_id, client_entry) = node("client", 1);
        let (server_id, server_entry) = node("server", 2);

        tokio::spawn(async move {
            let _ = respond(&mut server, &server_id, &server_entry, &Capabilities::default()).await;
        });

        let result = initiate(
            &mut client,
            &client_id,
            &client_entry,
            &Capabilities::default(),
            Some(&Address::random()),
        )
        .await;
        assert!(matches!(result, Err(NetError::Handshake(_))));
    }
}
