use otpkeep::{AuthError, Authenticator, HashAlgorithm, Node, Record, Variant, to_uri};

const SECRET: &str = "JBSWY3DPEHPK3PXP";

fn record(name: &str, auth: Authenticator) -> Record {
    Record::with_authenticator(name, auth)
}

#[test]
fn issuer_is_taken_from_the_name() {
    let auth = Authenticator::from_base32(Variant::Totp, SECRET).unwrap();
    let uri = to_uri(&record("Example (alice@example.com)", auth), false).unwrap();
    assert_eq!(
        uri,
        "otpauth://totp/Example:alice%40example.com?secret=JBSWY3DPEHPK3PXP&digits=6&issuer=Example"
    );
}

#[test]
fn defaults_are_left_out() {
    let auth = Authenticator::from_base32(Variant::Totp, SECRET).unwrap();
    let uri = to_uri(&record("alice", auth), false).unwrap();
    assert_eq!(uri, "otpauth://totp/alice?secret=JBSWY3DPEHPK3PXP&digits=6");
}

#[test]
fn non_default_algorithm_and_period_are_written() {
    let auth = Authenticator::from_base32(Variant::Totp, SECRET)
        .unwrap()
        .with_issuer("My Bank")
        .with_algorithm(HashAlgorithm::Sha512)
        .with_digits(8)
        .with_period(60);
    let uri = to_uri(&record("My Bank (joint)", auth), false).unwrap();
    assert_eq!(
        uri,
        "otpauth://totp/My%20Bank:joint?secret=JBSWY3DPEHPK3PXP&digits=8\
         &issuer=My+Bank&algorithm=SHA512&period=60"
    );
}

#[test]
fn hotp_carries_its_counter() {
    let auth = Authenticator::from_base32(Variant::Hotp { counter: 7 }, SECRET).unwrap();
    let uri = to_uri(&record("bank", auth), false).unwrap();
    assert_eq!(
        uri,
        "otpauth://hotp/bank?secret=JBSWY3DPEHPK3PXP&digits=6&counter=7"
    );
}

#[test]
fn battlenet_serial_is_written_without_dashes() {
    let variant = Variant::BattleNet {
        serial: "US-1234-5678-9012".into(),
    };
    let auth = Authenticator::from_base32(variant, SECRET)
        .unwrap()
        .with_issuer("Blizzard");
    let uri = to_uri(&record("wow", auth), false).unwrap();
    assert_eq!(
        uri,
        "otpauth://totp/Blizzard:wow?secret=JBSWY3DPEHPK3PXP&digits=8\
         &issuer=Blizzard&serial=US123456789012"
    );
}

#[test]
fn steam_session_fields_depend_on_compat() {
    let variant = Variant::Steam {
        device_id: "android:1234".into(),
        steam_data: "{}".into(),
    };
    let auth = Authenticator::from_base32(variant, SECRET)
        .unwrap()
        .with_issuer("Steam");
    let rec = record("gaben", auth);

    assert_eq!(
        to_uri(&rec, false).unwrap(),
        "otpauth://totp/Steam:gaben?secret=JBSWY3DPEHPK3PXP&digits=5\
         &issuer=Steam&deviceid=android%3A1234&data=%7B%7D"
    );
    assert_eq!(
        to_uri(&rec, true).unwrap(),
        "otpauth://totp/Steam:gaben?secret=JBSWY3DPEHPK3PXP&digits=5&issuer=Steam"
    );
}

#[test]
fn export_needs_an_open_authenticator() {
    assert!(matches!(
        to_uri(&Record::new(), false),
        Err(AuthError::NotAttached)
    ));

    let xml = r#"<record type="otpkeep.totp"><authenticatordata>
        <secretdata encrypted="argon2id-xchacha20poly1305">c2VhbGVk</secretdata>
        </authenticatordata></record>"#;
    let locked = Record::from_node(&Node::parse(xml).unwrap(), None).unwrap();
    assert!(matches!(
        to_uri(&locked, false),
        Err(AuthError::EncryptedSecret)
    ));
}
