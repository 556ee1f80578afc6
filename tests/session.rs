// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-party session lifecycle: create a group, grow it to full size, rotate every
//! member's keys, shrink it again, and keep protected traffic flowing at every step.
use treekem::crypto::sign::SignaturePrivateKey;
use treekem::{CipherSuite, ClientInitKey, Credential, Error, Rng, Session, SignatureScheme};

const GROUP_ID: &[u8] = &[0, 1, 2, 3];
const GROUP_SIZE: usize = 5;
const SUITES: [CipherSuite; 2] = [
    CipherSuite::P256Sha256Aes128Gcm,
    CipherSuite::X25519Sha256Aes128Gcm,
];

struct Harness {
    rng: Rng,
    sessions: Vec<Session>,
}

impl Harness {
    fn new() -> Self {
        Self {
            rng: Rng::default(),
            sessions: Vec::new(),
        }
    }

    fn client_init_key(&self, identity: &[u8]) -> ClientInitKey {
        let signature_key =
            SignaturePrivateKey::generate(SignatureScheme::Ed25519, &self.rng).unwrap();
        let credential = Credential::basic_with_key(identity, signature_key);
        let init_secret = self.rng.random_vec(32).unwrap();
        ClientInitKey::new(b"cik-id", &SUITES, &init_secret, credential).unwrap()
    }

    /// Creates the two-member group, or adds one member at the edge.
    fn grow(&mut self) {
        let joiner_cik = self.client_init_key(b"member");

        if self.sessions.is_empty() {
            let creator_cik = self.client_init_key(b"creator");
            let (creator, welcome, add) =
                Session::start(GROUP_ID, &creator_cik, &joiner_cik, &self.rng).unwrap();
            let joiner = Session::join(&joiner_cik, &welcome, &add).unwrap();
            self.sessions.push(creator);
            self.sessions.push(joiner);
            self.check_consistency(&[]);
            return;
        }

        let sender = self.sessions.len() - 1;
        let (welcome, add) = self.sessions[sender].add(&joiner_cik, &self.rng).unwrap();
        let joiner = Session::join(&joiner_cik, &welcome, &add).unwrap();
        for session in &mut self.sessions {
            session.handle(&add).unwrap();
        }
        self.sessions.push(joiner);
        self.check_consistency(&[]);
    }

    fn broadcast(&mut self, message: &[u8], except: &[usize]) {
        for (i, session) in self.sessions.iter_mut().enumerate() {
            if except.contains(&i) {
                continue;
            }
            session.handle(message).unwrap();
        }
    }

    /// All live members converged and can exchange protected traffic.
    fn check_consistency(&mut self, except: &[usize]) {
        let reference = (0..self.sessions.len())
            .find(|i| !except.contains(i))
            .unwrap();
        for i in 0..self.sessions.len() {
            if except.contains(&i) || i == reference {
                continue;
            }
            assert_eq!(
                self.sessions[i].current_epoch(),
                self.sessions[reference].current_epoch()
            );
            assert!(
                self.sessions[i].current_state().unwrap()
                    == self.sessions[reference].current_state().unwrap(),
                "member {i} diverged from member {reference}"
            );
        }

        for sender in 0..self.sessions.len() {
            if except.contains(&sender) {
                continue;
            }
            let encrypted = self.sessions[sender]
                .protect(b"consistency probe", &self.rng)
                .unwrap();
            for receiver in 0..self.sessions.len() {
                if except.contains(&receiver) || receiver == sender {
                    continue;
                }
                let decrypted = self.sessions[receiver].unprotect(&encrypted).unwrap();
                assert_eq!(decrypted, b"consistency probe");
            }
        }
    }
}

#[test]
fn create_two_person() {
    let mut harness = Harness::new();
    harness.grow();
    assert_eq!(harness.sessions.len(), 2);
    assert_eq!(harness.sessions[0].current_epoch(), 1);
    assert_eq!(harness.sessions[0].index().unwrap(), 0);
    assert_eq!(harness.sessions[1].index().unwrap(), 1);
    assert_eq!(
        harness.sessions[0].current_state().unwrap().tree().size().0,
        2
    );

    let hello = harness.sessions[0].protect(b"hello", &harness.rng).unwrap();
    assert_eq!(harness.sessions[1].unprotect(&hello).unwrap(), b"hello");
}

#[test]
fn create_full_size() {
    let mut harness = Harness::new();
    for _ in 0..GROUP_SIZE - 1 {
        harness.grow();
    }
    assert_eq!(harness.sessions.len(), GROUP_SIZE);
    assert_eq!(
        harness.sessions[0].current_state().unwrap().tree().size().0,
        GROUP_SIZE as u32
    );
}

#[test]
fn everyone_updates_in_turn() {
    let mut harness = Harness::new();
    for _ in 0..GROUP_SIZE - 1 {
        harness.grow();
    }

    for updater in 0..GROUP_SIZE {
        let before = harness.sessions[updater]
            .current_state()
            .unwrap()
            .application_secret()
            .clone();
        let initial_epoch = harness.sessions[0].current_epoch();

        let leaf_secret = harness.rng.random_vec(32).unwrap();
        let update = harness.sessions[updater]
            .update(&leaf_secret, &harness.rng)
            .unwrap();
        harness.broadcast(&update, &[]);
        harness.check_consistency(&[]);

        let state = harness.sessions[updater].current_state().unwrap();
        assert_eq!(state.epoch(), initial_epoch + 1);
        assert_ne!(state.application_secret(), &before);
    }
}

#[test]
fn remove_and_continue() {
    let mut harness = Harness::new();
    for _ in 0..GROUP_SIZE - 1 {
        harness.grow();
    }

    // Member 0 evicts the last member.
    let target = GROUP_SIZE - 1;
    let evict_secret = harness.rng.random_vec(32).unwrap();
    let remove = harness.sessions[0]
        .remove(&evict_secret, target as u32, &harness.rng)
        .unwrap();

    // The removed member cannot process its own eviction.
    assert!(matches!(
        harness.sessions[target].handle(&remove),
        Err(Error::MissingNode)
    ));

    harness.broadcast(&remove, &[target]);
    harness.check_consistency(&[target]);

    // New traffic is dark to the removed member.
    let encrypted = harness.sessions[1]
        .protect(b"after eviction", &harness.rng)
        .unwrap();
    assert!(matches!(
        harness.sessions[target].unprotect(&encrypted),
        Err(Error::MissingState)
    ));
    assert_eq!(
        harness.sessions[0].unprotect(&encrypted).unwrap(),
        b"after eviction"
    );
}

#[test]
fn shrink_to_creator() {
    let mut harness = Harness::new();
    for _ in 0..GROUP_SIZE - 1 {
        harness.grow();
    }

    for target in (1..GROUP_SIZE).rev() {
        let evict_secret = harness.rng.random_vec(32).unwrap();
        let remove = harness.sessions[target - 1]
            .remove(&evict_secret, target as u32, &harness.rng)
            .unwrap();
        harness.sessions.truncate(target);
        // Former members keep receiving nothing; survivors converge.
        harness.broadcast(&remove, &[]);
        if harness.sessions.len() > 1 {
            harness.check_consistency(&[]);
        }
    }
    assert_eq!(harness.sessions.len(), 1);
}

#[test]
fn ciphersuite_negotiation_prefers_sender_order() {
    let rng = Rng::default();

    let make_cik = |identity: &[u8], suites: &[CipherSuite]| {
        let key = SignaturePrivateKey::generate(SignatureScheme::Ed25519, &rng).unwrap();
        let credential = Credential::basic_with_key(identity, key);
        let init_secret = rng.random_vec(32).unwrap();
        ClientInitKey::new(b"cik-id", suites, &init_secret, credential).unwrap()
    };

    // Alice prefers P-256 then X25519; Bob supports X25519 then P-256. Alice's order wins.
    let alice_cik = make_cik(
        b"alice",
        &[
            CipherSuite::P256Sha256Aes128Gcm,
            CipherSuite::X25519Sha256Aes128Gcm,
        ],
    );
    let bob_cik = make_cik(
        b"bob",
        &[
            CipherSuite::X25519Sha256Aes128Gcm,
            CipherSuite::P256Sha256Aes128Gcm,
        ],
    );

    let (alice, welcome, add) = Session::start(GROUP_ID, &alice_cik, &bob_cik, &rng).unwrap();
    let bob = Session::join(&bob_cik, &welcome, &add).unwrap();

    assert_eq!(
        alice.cipher_suite().unwrap(),
        CipherSuite::P256Sha256Aes128Gcm
    );
    assert_eq!(
        bob.cipher_suite().unwrap(),
        CipherSuite::P256Sha256Aes128Gcm
    );
    assert!(alice.current_state().unwrap() == bob.current_state().unwrap());
}

#[test]
fn out_of_epoch_messages_are_rejected() {
    let mut harness = Harness::new();
    harness.grow();

    // Capture an update but deliver it only to the sender; the receiver misses the epoch.
    let leaf_secret = harness.rng.random_vec(32).unwrap();
    let update = harness.sessions[0]
        .update(&leaf_secret, &harness.rng)
        .unwrap();
    harness.sessions[0].handle(&update).unwrap();

    let next_secret = harness.rng.random_vec(32).unwrap();
    let second_update = harness.sessions[0]
        .update(&next_secret, &harness.rng)
        .unwrap();

    // Member 1 is still one epoch behind and must reject the newer handshake.
    assert!(matches!(
        harness.sessions[1].handle(&second_update),
        Err(Error::MissingState)
    ));

    // Catching up in order works.
    harness.sessions[1].handle(&update).unwrap();
    harness.sessions[0].handle(&second_update).unwrap();
    harness.sessions[1].handle(&second_update).unwrap();
    harness.check_consistency(&[]);
}

#[test]
fn replace_a_member_in_place() {
    let mut harness = Harness::new();
    for _ in 0..GROUP_SIZE - 1 {
        harness.grow();
    }

    // Evict member 2, then re-add a newcomer into the blank slot.
    let target = 2usize;
    let evict_secret = harness.rng.random_vec(32).unwrap();
    let remove = harness.sessions[0]
        .remove(&evict_secret, target as u32, &harness.rng)
        .unwrap();
    harness.broadcast(&remove, &[target]);

    let newcomer_cik = harness.client_init_key(b"newcomer");
    let (welcome, add) = harness.sessions[0].add(&newcomer_cik, &harness.rng).unwrap();
    let newcomer = Session::join(&newcomer_cik, &welcome, &add).unwrap();

    for (i, session) in harness.sessions.iter_mut().enumerate() {
        if i == target {
            continue;
        }
        session.handle(&add).unwrap();
    }
    harness.sessions[target] = newcomer;

    // The newcomer landed in the blank slot, not at the edge.
    assert_eq!(harness.sessions[target].index().unwrap(), target as u32);
    assert_eq!(
        harness.sessions[0].current_state().unwrap().tree().size().0,
        GROUP_SIZE as u32
    );
    harness.check_consistency(&[]);
}
