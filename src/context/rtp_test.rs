use bytes::Bytes;
use lazy_static::lazy_static;
use util::marshal::*;

use crate::context::rtp::RtpContext;
use crate::error::Error;
use crate::policy::Policy;

const TEST_MASTER_KEY: [u8; 16] = [
    0x0d, 0xcd, 0x21, 0x3e, 0x4c, 0xbc, 0xf2, 0x8f, 0x01, 0x7f, 0x69, 0x94, 0x40, 0x1e, 0x28,
    0x89,
];
const TEST_MASTER_SALT: [u8; 14] = [
    0x62, 0x77, 0x60, 0x38, 0xc0, 0x6d, 0xc9, 0x41, 0x9f, 0x6d, 0xd9, 0x43, 0x3e, 0x7c,
];

struct RtpTestCase {
    sequence_number: u16,
    encrypted: Bytes,
}

lazy_static! {
    static ref RTP_TEST_CASE_DECRYPTED: Bytes =
        Bytes::from_static(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05]);
    static ref RTP_TEST_CASES: Vec<RtpTestCase> = vec![
        RtpTestCase {
            sequence_number: 5000,
            encrypted: Bytes::from_static(&[
                0x6d, 0xd3, 0x7e, 0xd5, 0x99, 0xb7, 0x2d, 0x28, 0xb1, 0xf3, 0xa1, 0xf0, 0xc, 0xfb,
                0xfd, 0x8
            ]),
        },
        RtpTestCase {
            sequence_number: 5001,
            encrypted: Bytes::from_static(&[
                0xda, 0x47, 0xb, 0x2a, 0x74, 0x53, 0x65, 0xbd, 0x2f, 0xeb, 0xdc, 0x4b, 0x6d, 0x23,
                0xf3, 0xde
            ]),
        },
        RtpTestCase {
            sequence_number: 5002,
            encrypted: Bytes::from_static(&[
                0x6e, 0xa7, 0x69, 0x8d, 0x24, 0x6d, 0xdc, 0xbf, 0xec, 0x2, 0x1c, 0xd1, 0x60, 0x76,
                0xc1, 0x0e
            ]),
        },
        RtpTestCase {
            sequence_number: 5003,
            encrypted: Bytes::from_static(&[
                0x24, 0x7e, 0x96, 0xc8, 0x7d, 0x33, 0xa2, 0x92, 0x8d, 0x13, 0x8d, 0xe0, 0x76, 0x9f,
                0x08, 0xdc
            ]),
        },
        RtpTestCase {
            sequence_number: 5004,
            encrypted: Bytes::from_static(&[
                0x75, 0x43, 0x28, 0xe4, 0x3a, 0x77, 0x59, 0x9b, 0x2e, 0xdf, 0x7b, 0x12, 0x68, 0x0b,
                0x57, 0x49
            ]),
        },
    ];
}

fn build_context(sender: bool, policy: Policy) -> RtpContext {
    RtpContext::new(
        sender,
        0,
        0,
        0,
        &TEST_MASTER_KEY,
        &TEST_MASTER_SALT,
        policy,
        true,
    )
    .expect("failed to create context")
}

fn marshal_rtp(sequence_number: u16, payload: &Bytes) -> Bytes {
    let pkt = rtp::packet::Packet {
        header: rtp::header::Header {
            sequence_number,
            ..Default::default()
        },
        payload: payload.clone(),
    };
    pkt.marshal().expect("failed to marshal")
}

#[test]
fn test_rtp_lifecycle() {
    let mut encrypt_context = build_context(true, Policy::aes_cm_hmac_sha1_80());
    let mut decrypt_context = build_context(false, Policy::aes_cm_hmac_sha1_80());
    let auth_tag_len = Policy::aes_cm_hmac_sha1_80().auth_tag_len;

    for test_case in RTP_TEST_CASES.iter() {
        let decrypted_raw = marshal_rtp(test_case.sequence_number, &RTP_TEST_CASE_DECRYPTED);
        let encrypted_raw = marshal_rtp(test_case.sequence_number, &test_case.encrypted);

        let actual_encrypted = encrypt_context.transform(&decrypted_raw).unwrap();
        assert_eq!(
            actual_encrypted, encrypted_raw,
            "RTP packet with SeqNum invalid encryption: {}",
            test_case.sequence_number
        );

        let actual_decrypted = decrypt_context.reverse_transform(&encrypted_raw).unwrap();
        assert_ne!(
            encrypted_raw[..encrypted_raw.len() - auth_tag_len].to_vec(),
            actual_decrypted,
            "reverse transform improperly encrypted in place"
        );
        assert_eq!(
            actual_decrypted, decrypted_raw,
            "RTP packet with SeqNum invalid decryption: {}",
            test_case.sequence_number
        );
    }
}

#[test]
fn test_rtp_lifecycle_at_upper_sequence_boundary() {
    // A fresh stream starting right below the wrap point.
    let mut encrypt_context = build_context(true, Policy::aes_cm_hmac_sha1_80());
    let mut decrypt_context = build_context(false, Policy::aes_cm_hmac_sha1_80());

    let encrypted_payload = Bytes::from_static(&[
        0xaf, 0xf7, 0xc2, 0x70, 0x37, 0x20, 0x83, 0x9c, 0x2c, 0x63, 0x85, 0x15, 0x0e, 0x44, 0xca,
        0x36,
    ]);
    let decrypted_raw = marshal_rtp(65535, &RTP_TEST_CASE_DECRYPTED);
    let encrypted_raw = marshal_rtp(65535, &encrypted_payload);

    let actual_encrypted = encrypt_context.transform(&decrypted_raw).unwrap();
    assert_eq!(actual_encrypted, encrypted_raw);

    let actual_decrypted = decrypt_context.reverse_transform(&encrypted_raw).unwrap();
    assert_eq!(actual_decrypted, decrypted_raw);
}

#[test]
fn test_rtp_invalid_auth() {
    let invalid_salt = [0u8; 14];

    let mut encrypt_context = build_context(true, Policy::aes_cm_hmac_sha1_80());
    let mut invalid_context = RtpContext::new(
        false,
        0,
        0,
        0,
        &TEST_MASTER_KEY,
        &invalid_salt,
        Policy::aes_cm_hmac_sha1_80(),
        true,
    )
    .unwrap();

    for test_case in RTP_TEST_CASES.iter() {
        let pkt_raw = marshal_rtp(test_case.sequence_number, &RTP_TEST_CASE_DECRYPTED);
        let out = encrypt_context.transform(&pkt_raw).unwrap();

        assert!(
            invalid_context.reverse_transform(&out).is_err(),
            "managed to decrypt with incorrect salt for packet with SeqNum: {}",
            test_case.sequence_number
        );
    }
}

#[test]
fn test_sequence_wrap_advances_rollover_counter() {
    let mut sender = build_context(true, Policy::aes_cm_hmac_sha1_80());
    let mut receiver = build_context(false, Policy::aes_cm_hmac_sha1_80());

    for seq in [65534u16, 65535, 0, 1] {
        let plain = marshal_rtp(seq, &RTP_TEST_CASE_DECRYPTED);
        let protected = sender.transform(&plain).unwrap();
        let unprotected = receiver.reverse_transform(&protected).unwrap();
        assert_eq!(unprotected, plain, "round trip failed at seq {seq}");
    }

    assert_eq!(sender.roc, 1);
    assert_eq!(sender.s_l, 1);
    assert_eq!(receiver.roc, 1);
    assert_eq!(receiver.s_l, 1);
}

#[test]
fn test_late_packet_from_before_wrap() {
    let mut sender = build_context(true, Policy::aes_cm_hmac_sha1_80());
    let mut receiver = build_context(false, Policy::aes_cm_hmac_sha1_80());
    for seq in [65534u16, 65535, 0, 1] {
        let protected = sender
            .transform(&marshal_rtp(seq, &RTP_TEST_CASE_DECRYPTED))
            .unwrap();
        receiver.reverse_transform(&protected).unwrap();
    }

    // A straggler from before the wrap is still protected under the old
    // rollover counter; a second sender that never wrapped produces it.
    let mut late_sender = build_context(true, Policy::aes_cm_hmac_sha1_80());
    let plain = marshal_rtp(65533, &RTP_TEST_CASE_DECRYPTED);
    let protected = late_sender.transform(&plain).unwrap();

    let unprotected = receiver.reverse_transform(&protected).unwrap();
    assert_eq!(unprotected, plain);
    assert_eq!(receiver.roc, 1, "late packet must not roll the counter back");
    assert_eq!(receiver.s_l, 1);

    // Delivering it again trips the replay window at delta 4.
    assert!(matches!(
        receiver.reverse_transform(&protected),
        Err(Error::Replayed(_, _))
    ));
}

#[test]
fn test_replayed_packet_rejected() {
    let mut sender = build_context(true, Policy::aes_cm_hmac_sha1_80());
    let mut receiver = build_context(false, Policy::aes_cm_hmac_sha1_80());

    let protected = sender
        .transform(&marshal_rtp(1234, &RTP_TEST_CASE_DECRYPTED))
        .unwrap();
    receiver.reverse_transform(&protected).unwrap();
    assert!(matches!(
        receiver.reverse_transform(&protected),
        Err(Error::Replayed(0, _))
    ));
}

#[test]
fn test_packet_below_window_rejected_as_too_old() {
    let mut sender = build_context(true, Policy::aes_cm_hmac_sha1_80());
    let mut receiver = build_context(false, Policy::aes_cm_hmac_sha1_80());
    let protected = sender
        .transform(&marshal_rtp(1000, &RTP_TEST_CASE_DECRYPTED))
        .unwrap();
    receiver.reverse_transform(&protected).unwrap();

    let mut old_sender = build_context(true, Policy::aes_cm_hmac_sha1_80());
    let old_protected = old_sender
        .transform(&marshal_rtp(900, &RTP_TEST_CASE_DECRYPTED))
        .unwrap();
    assert!(matches!(
        receiver.reverse_transform(&old_protected),
        Err(Error::TooOld(0, 900))
    ));
}

fn observable_state(ctx: &RtpContext) -> (u32, u16, bool, crate::replay::ReplayWindow) {
    (ctx.roc, ctx.s_l, ctx.seq_initialized, ctx.window)
}

#[test]
fn test_forged_first_packet_rolls_initialization_back() {
    let mut sender = build_context(true, Policy::aes_cm_hmac_sha1_80());
    let mut receiver = build_context(false, Policy::aes_cm_hmac_sha1_80());

    let protected = sender
        .transform(&marshal_rtp(800, &RTP_TEST_CASE_DECRYPTED))
        .unwrap();
    let mut forged = protected.to_vec();
    let last = forged.len() - 1;
    forged[last] ^= 0xff;

    let before = observable_state(&receiver);
    assert_eq!(
        receiver.reverse_transform(&forged),
        Err(Error::AuthFailed)
    );
    assert!(!receiver.seq_initialized);
    assert_eq!(receiver.s_l, 0);
    assert_eq!(
        observable_state(&receiver),
        before,
        "rejected first packet must leave the context untouched"
    );

    // The genuine first packet then initializes the stream normally.
    let unprotected = receiver.reverse_transform(&protected).unwrap();
    assert_eq!(unprotected, marshal_rtp(800, &RTP_TEST_CASE_DECRYPTED));
    assert!(receiver.seq_initialized);
    assert_eq!(receiver.s_l, 800);
}

#[test]
fn test_rejection_is_idempotent_mid_stream() {
    let mut sender = build_context(true, Policy::aes_cm_hmac_sha1_80());
    let mut receiver = build_context(false, Policy::aes_cm_hmac_sha1_80());
    for seq in 100..105u16 {
        let protected = sender
            .transform(&marshal_rtp(seq, &RTP_TEST_CASE_DECRYPTED))
            .unwrap();
        receiver.reverse_transform(&protected).unwrap();
    }

    let mut forged = sender
        .transform(&marshal_rtp(105, &RTP_TEST_CASE_DECRYPTED))
        .unwrap()
        .to_vec();
    forged[20] ^= 0x01;

    let before = observable_state(&receiver);
    assert_eq!(
        receiver.reverse_transform(&forged),
        Err(Error::AuthFailed)
    );
    assert_eq!(observable_state(&receiver), before);
    assert_eq!(
        receiver.reverse_transform(&forged),
        Err(Error::AuthFailed)
    );
    assert_eq!(observable_state(&receiver), before);
}

#[test]
fn test_sender_rollover_counter_exhaustion() {
    let mut sender = build_context(true, Policy::aes_cm_hmac_sha1_80());
    sender.seq_initialized = true;
    sender.s_l = 65535;
    sender.roc = u32::MAX;

    let plain = marshal_rtp(0, &RTP_TEST_CASE_DECRYPTED);
    assert_eq!(sender.transform(&plain), Err(Error::IndexOverflow));
}

#[test]
fn test_index_estimation() {
    let mut ctx = build_context(false, Policy::aes_cm_hmac_sha1_80());
    ctx.seq_initialized = true;

    let index = |roc: u32, seq: u16| (i64::from(roc as i32) << 16) | i64::from(seq);

    ctx.roc = 5;
    ctx.s_l = 1000;
    assert_eq!(ctx.guess_index(1), index(5, 1));
    assert_eq!(ctx.guess_index(10001), index(5, 10001));
    assert_eq!(ctx.guess_index(60001), index(4, 60001));

    ctx.s_l = 60000;
    assert_eq!(ctx.guess_index(60001), index(5, 60001));
    assert_eq!(ctx.guess_index(30001), index(5, 30001));
    assert_eq!(ctx.guess_index(10001), index(6, 10001));

    // A stream that never wrapped sign-extends the roc - 1 guess negative,
    // which the replay window then rejects as ancient.
    ctx.roc = 0;
    ctx.s_l = 1000;
    assert!(ctx.guess_index(60001) < 0);
}

#[test]
fn test_round_trip_per_cipher_suite() {
    let policies = [
        Policy::aes_cm_hmac_sha1_80(),
        Policy::aes_cm_hmac_sha1_32(),
        Policy::aes_f8_hmac_sha1_80(),
        Policy::twofish_cm_hmac_sha1_80(),
        Policy::twofish_f8_hmac_sha1_80(),
        Policy::aes_cm_skein(),
    ];
    for policy in policies {
        let mut sender = build_context(true, policy);
        let mut receiver = build_context(false, policy);
        for seq in 40..44u16 {
            let plain = marshal_rtp(seq, &RTP_TEST_CASE_DECRYPTED);
            let protected = sender.transform(&plain).unwrap();
            assert_eq!(plain.len() + policy.auth_tag_len, protected.len());
            assert_ne!(
                &protected[12..12 + RTP_TEST_CASE_DECRYPTED.len()],
                &RTP_TEST_CASE_DECRYPTED[..],
                "payload went out in the clear for {:?}",
                policy.encryption
            );
            let unprotected = receiver.reverse_transform(&protected).unwrap();
            assert_eq!(unprotected, plain, "round trip failed for {policy:?}");
        }
    }
}

#[test]
fn test_null_cipher_keeps_payload_in_clear() {
    let policy = Policy::null_cipher_hmac_sha1_80();
    let mut sender = build_context(true, policy);
    let mut receiver = build_context(false, policy);

    let plain = marshal_rtp(77, &RTP_TEST_CASE_DECRYPTED);
    let protected = sender.transform(&plain).unwrap();
    assert_eq!(&protected[..plain.len()], &plain[..]);
    assert_eq!(plain.len() + policy.auth_tag_len, protected.len());

    // The tag is still enforced.
    let mut forged = protected.to_vec();
    forged[14] ^= 0x80;
    assert_eq!(
        receiver.reverse_transform(&forged),
        Err(Error::AuthFailed)
    );
    assert_eq!(receiver.reverse_transform(&protected).unwrap(), plain);
}

#[test]
fn test_session_keys_rotate_with_derivation_rate() {
    let policy = Policy::aes_cm_hmac_sha1_80();
    let mut sender = RtpContext::new(
        true,
        0,
        0,
        4,
        &TEST_MASTER_KEY,
        &TEST_MASTER_SALT,
        policy,
        true,
    )
    .unwrap();
    let mut receiver = RtpContext::new(
        false,
        0,
        0,
        4,
        &TEST_MASTER_KEY,
        &TEST_MASTER_SALT,
        policy,
        true,
    )
    .unwrap();

    for seq in 0..10u16 {
        let plain = marshal_rtp(seq, &RTP_TEST_CASE_DECRYPTED);
        let protected = sender.transform(&plain).unwrap();
        let unprotected = receiver.reverse_transform(&protected).unwrap();
        assert_eq!(unprotected, plain, "round trip failed at seq {seq}");
    }

    // Packets across a derivation boundary use different keystreams even
    // for the same payload and almost-same index.
    let mut a = RtpContext::new(true, 0, 0, 4, &TEST_MASTER_KEY, &TEST_MASTER_SALT, policy, true)
        .unwrap();
    let p3 = a.transform(&marshal_rtp(3, &RTP_TEST_CASE_DECRYPTED)).unwrap();
    let p4 = a.transform(&marshal_rtp(4, &RTP_TEST_CASE_DECRYPTED)).unwrap();
    assert_ne!(&p3[12..18], &p4[12..18]);
}

#[test]
fn test_forged_packet_on_derivation_boundary_keeps_keys() {
    let policy = Policy::aes_cm_hmac_sha1_80();
    let build = |sender| {
        RtpContext::new(
            sender,
            0,
            0,
            4,
            &TEST_MASTER_KEY,
            &TEST_MASTER_SALT,
            policy,
            true,
        )
        .unwrap()
    };
    let mut sender = build(true);
    let mut receiver = build(false);

    for seq in 0..2u16 {
        let protected = sender
            .transform(&marshal_rtp(seq, &RTP_TEST_CASE_DECRYPTED))
            .unwrap();
        receiver.reverse_transform(&protected).unwrap();
    }

    // A forged packet whose sequence number lands two epochs ahead
    // (8 % 4 == 0) fails to authenticate and must not drag the receiver's
    // session keys forward with it.
    let mut future_sender = build(true);
    let mut forged = future_sender
        .transform(&marshal_rtp(8, &RTP_TEST_CASE_DECRYPTED))
        .unwrap()
        .to_vec();
    let last = forged.len() - 1;
    forged[last] ^= 0xff;
    assert_eq!(
        receiver.reverse_transform(&forged),
        Err(Error::AuthFailed)
    );

    // Mid-epoch traffic keeps decrypting with the keys in use, and the
    // legitimate epoch change at seq 4 still goes through.
    let mut boundary_packet = None;
    for seq in 2..6u16 {
        let plain = marshal_rtp(seq, &RTP_TEST_CASE_DECRYPTED);
        let protected = sender.transform(&plain).unwrap();
        assert_eq!(
            receiver.reverse_transform(&protected).unwrap(),
            plain,
            "round trip failed at seq {seq} after rejected boundary forgery"
        );
        if seq == 4 {
            boundary_packet = Some(protected);
        }
    }

    // Replaying the accepted boundary packet is rejected before any
    // derivation work and leaves the stream healthy.
    assert!(matches!(
        receiver.reverse_transform(&boundary_packet.unwrap()),
        Err(Error::Replayed(0, _))
    ));
    let plain = marshal_rtp(6, &RTP_TEST_CASE_DECRYPTED);
    let protected = sender.transform(&plain).unwrap();
    assert_eq!(receiver.reverse_transform(&protected).unwrap(), plain);
}

#[test]
fn test_short_packet_rejected() {
    let mut receiver = build_context(false, Policy::aes_cm_hmac_sha1_80());
    let header_only = marshal_rtp(5, &Bytes::new());
    assert!(matches!(
        receiver.reverse_transform(&header_only),
        Err(Error::PacketTooShort(_, _))
    ));
}
