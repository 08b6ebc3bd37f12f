use otpkeep::{
    AuthError, Authenticator, HashAlgorithm, Node, OtpEngine, Record, SecretKey, Variant,
};

const SECRET: &str = "JBSWY3DPEHPK3PXP";

fn child_names(node: &Node) -> Vec<&str> {
    node.elements().map(|n| n.name()).collect()
}

/// Writes `record` out as XML text and decodes it into a fresh record.
fn reload(record: &Record) -> (Record, bool) {
    let xml = record.to_node().unwrap().to_xml().unwrap();
    let node = Node::parse(&xml).unwrap();
    let mut loaded = Record::new();
    let changed = loaded.read_from(&node, None).unwrap();
    (loaded, changed)
}

#[test]
fn record_survives_a_trip_through_xml() {
    let auth = Authenticator::from_base32(Variant::Totp, SECRET)
        .unwrap()
        .with_issuer("GitHub")
        .with_algorithm(HashAlgorithm::Sha256)
        .with_period(60);
    let mut record = Record::with_authenticator("GitHub (octocat)", auth);
    record.set_index(4);
    record.set_allow_copy(true);
    record.set_hide_serial(true);

    let (loaded, changed) = reload(&record);

    assert!(!changed);
    assert_eq!(loaded.id(), record.id());
    assert_eq!(loaded.name(), "GitHub (octocat)");
    assert_eq!(loaded.created_millis(), record.created_millis());
    assert!(loaded.allow_copy());
    assert!(loaded.hide_serial());
    assert!(!loaded.copy_on_code());
    assert_eq!(loaded.authenticator(), record.authenticator());
}

#[test]
fn record_children_are_written_in_a_fixed_order() {
    let auth = Authenticator::from_base32(Variant::Hotp { counter: 3 }, SECRET).unwrap();
    let node = Record::with_authenticator("bank", auth).to_node().unwrap();

    assert_eq!(node.name(), "record");
    assert_eq!(node.attribute("type"), Some("otpkeep.hotp"));
    assert_eq!(
        child_names(&node),
        [
            "name",
            "created",
            "autorefresh",
            "allowcopy",
            "copyoncode",
            "hideserial",
            "authenticatordata"
        ]
    );

    let block = node.element("authenticatordata").unwrap();
    assert_eq!(
        child_names(block),
        [
            "issuer",
            "hmactype",
            "codedigits",
            "period",
            "servertimediff",
            "lastservertime",
            "secretdata",
            "counter"
        ]
    );
    // stored flag reflects the effective value: HOTP never auto-refreshes
    assert_eq!(node.element("autorefresh").unwrap().text(), "false");
}

#[test]
fn sealed_secret_without_password_keeps_the_rest_of_the_record() {
    let xml = r#"
        <record id="6f1c2a9e-3d4b-4c8a-9f0e-1a2b3c4d5e6f" type="otpkeep.totp">
          <name>Mail</name>
          <created>1700000000000</created>
          <copyoncode>true</copyoncode>
          <authenticatordata>
            <issuer>Mail</issuer>
            <hmactype>SHA1</hmactype>
            <codedigits>6</codedigits>
            <period>30</period>
            <secretdata encrypted="argon2id-xchacha20poly1305">c2VhbGVk</secretdata>
          </authenticatordata>
        </record>"#;

    let node = Node::parse(xml).unwrap();
    let mut record = Record::from_node(&node, None).unwrap();

    assert_eq!(record.name(), "Mail");
    assert_eq!(record.created_millis(), 1_700_000_000_000);
    assert!(record.copy_on_code());

    let auth = record.authenticator().unwrap();
    assert!(auth.is_locked());
    assert_eq!(auth.issuer(), "Mail");
    assert!(auth.secret_key().is_none());
    assert!(matches!(
        record.current_code(),
        Err(AuthError::EncryptedSecret)
    ));

    // the sealed blob is written back untouched
    let again = record.to_node().unwrap();
    let secret = again
        .element("authenticatordata")
        .and_then(|b| b.element("secretdata"))
        .unwrap();
    assert_eq!(secret.attribute("encrypted"), Some("argon2id-xchacha20poly1305"));
    assert_eq!(secret.text(), "c2VhbGVk");
}

#[test]
fn password_protected_secret_opens_with_the_password() {
    let auth = Authenticator::from_base32(Variant::Totp, SECRET).unwrap();
    let mut record = Record::with_authenticator("vault", auth);
    record
        .authenticator_mut()
        .unwrap()
        .protect(Some("hunter2"))
        .unwrap();
    let xml = record.to_node().unwrap().to_xml().unwrap();
    assert!(!xml.contains(SECRET));

    let node = Node::parse(&xml).unwrap();
    let locked = Record::from_node(&node, Some("wrong")).unwrap();
    assert!(locked.authenticator().unwrap().is_locked());

    let opened = Record::from_node(&node, Some("hunter2")).unwrap();
    let auth = opened.authenticator().unwrap();
    assert!(!auth.is_locked());
    assert!(auth.is_protected());
    assert_eq!(auth.secret(), record.authenticator().unwrap().secret());
}

#[test]
fn legacy_layout_is_migrated() {
    let xml = r#"
        <record>
          <name>Blizzard</name>
          <servertimediff>-1500</servertimediff>
          <authenticator type="OTPKEEP.BATTLENET">
            <hmactype>HMACSHA1</hmactype>
            <secretdata>JBSWY3DPEHPK3PXP|US-1234-5678</secretdata>
          </authenticator>
        </record>"#;

    let node = Node::parse(xml).unwrap();
    let mut record = Record::new();
    let changed = record.read_from(&node, None).unwrap();

    assert!(changed);
    let auth = record.authenticator().unwrap();
    assert_eq!(auth.tag(), "otpkeep.battlenet");
    assert_eq!(auth.serial(), Some("US-1234-5678"));
    assert_eq!(auth.code_digits(), 8);
    assert_eq!(auth.server_time_diff(), -1500);

    // written back in the current layout
    let current = record.to_node().unwrap();
    assert!(current.element("authenticator").is_none());
    assert!(current.element("servertimediff").is_none());
    let block = current.element("authenticatordata").unwrap();
    assert_eq!(block.element("secretdata").unwrap().text(), SECRET);
    assert_eq!(block.element("servertimediff").unwrap().text(), "-1500");
}

#[test]
fn empty_record_element_leaves_defaults() {
    let node = Node::parse(r#"<record type="otpkeep.steam"/>"#).unwrap();
    let record = Record::from_node(&node, None).unwrap();

    assert_eq!(record.name(), "");
    assert!(record.auto_refresh());
    let auth = record.authenticator().unwrap();
    assert_eq!(auth.code_digits(), 5);
    assert!(matches!(auth.secret(), SecretKey::Unlocked(k) if k.is_empty()));
}

#[test]
fn unknown_type_is_rejected() {
    let node = Node::parse(r#"<record type="otpkeep.yubikey"><name>x</name></record>"#).unwrap();
    assert!(matches!(
        Record::from_node(&node, None),
        Err(AuthError::UnknownVariant(tag)) if tag == "otpkeep.yubikey"
    ));
}

#[test]
fn authenticator_block_needs_a_type() {
    let node =
        Node::parse("<record><authenticatordata><period>30</period></authenticatordata></record>")
            .unwrap();
    assert!(matches!(
        Record::from_node(&node, None),
        Err(AuthError::UnknownVariant(tag)) if tag.is_empty()
    ));
}

#[test]
fn malformed_values_fail_the_decode() {
    let node = Node::parse("<record><allowcopy>maybe</allowcopy></record>").unwrap();
    assert!(matches!(
        Record::from_node(&node, None),
        Err(AuthError::InvalidValue { element, .. }) if element == "allowcopy"
    ));

    let node = Node::parse(
        r#"<record type="otpkeep.totp">
             <authenticatordata><hmactype>MD5</hmactype></authenticatordata>
           </record>"#,
    )
    .unwrap();
    assert!(matches!(
        Record::from_node(&node, None),
        Err(AuthError::InvalidValue { element, .. }) if element == "hmactype"
    ));
}

#[test]
fn hotp_counter_survives_a_trip_through_xml() {
    let auth = Authenticator::from_base32(Variant::Hotp { counter: 41 }, SECRET)
        .unwrap()
        .with_issuer("Bank")
        .with_digits(8);
    let mut record = Record::with_authenticator("Bank (savings)", auth);
    record.set_copy_on_code(true);

    let (loaded, changed) = reload(&record);

    assert!(!changed);
    assert!(loaded.copy_on_code());
    assert!(!loaded.auto_refresh());
    let auth = loaded.authenticator().unwrap();
    assert_eq!(auth.tag(), "otpkeep.hotp");
    assert_eq!(auth.counter(), Some(41));
    assert_eq!(auth.code_digits(), 8);
    assert_eq!(loaded.authenticator(), record.authenticator());
}

#[test]
fn steam_session_fields_survive_a_trip_through_xml() {
    let variant = Variant::Steam {
        device_id: "android:5c1e-77f0".into(),
        steam_data: r#"{"shared_secret":"x","identity_secret":"<y&z>"}"#.into(),
    };
    let auth = Authenticator::from_base32(variant, SECRET)
        .unwrap()
        .with_issuer("Steam");
    let record = Record::with_authenticator("gaben", auth);

    let (loaded, changed) = reload(&record);

    assert!(!changed);
    let auth = loaded.authenticator().unwrap();
    assert_eq!(auth.tag(), "otpkeep.steam");
    assert_eq!(auth.device_id(), Some("android:5c1e-77f0"));
    assert_eq!(
        auth.session_data(),
        Some(r#"{"shared_secret":"x","identity_secret":"<y&z>"}"#)
    );
    assert_eq!(auth.code_digits(), 5);
    assert_eq!(loaded.authenticator(), record.authenticator());
}

#[test]
fn battlenet_serial_survives_a_trip_through_xml() {
    let variant = Variant::BattleNet {
        serial: "EU-1234-5678-9012".into(),
    };
    let auth = Authenticator::from_base32(variant, SECRET).unwrap();
    let mut record = Record::with_authenticator("wow", auth);
    record.set_hide_serial(true);

    let (loaded, changed) = reload(&record);

    assert!(!changed);
    assert!(loaded.hide_serial());
    assert_eq!(loaded.authenticator().unwrap().serial(), Some("EU-1234-5678-9012"));
    assert_eq!(loaded.authenticator(), record.authenticator());
}

#[test]
fn created_outside_the_calendar_is_rejected() {
    let node = Node::parse("<record><created>9223372036854775807</created></record>").unwrap();
    assert!(matches!(
        Record::from_node(&node, None),
        Err(AuthError::InvalidValue { element, .. }) if element == "created"
    ));
}

#[test]
fn oversized_digit_count_is_rejected_on_decode() {
    let node = Node::parse(
        r#"<record type="otpkeep.totp">
             <authenticatordata>
               <codedigits>10</codedigits>
               <secretdata>JBSWY3DPEHPK3PXP</secretdata>
             </authenticatordata>
           </record>"#,
    )
    .unwrap();
    assert!(matches!(
        Record::from_node(&node, None),
        Err(AuthError::InvalidValue { element, .. }) if element == "codedigits"
    ));
}

#[test]
fn unreadable_hotp_code_leaves_the_counter_alone() {
    let node = Node::parse(
        r#"<record type="otpkeep.hotp">
             <name>empty</name>
             <authenticatordata><counter>5</counter></authenticatordata>
           </record>"#,
    )
    .unwrap();
    let mut record = Record::from_node(&node, None).unwrap();

    let events = std::rc::Rc::new(std::cell::Cell::new(0));
    let seen = events.clone();
    record.subscribe(move |_, _| seen.set(seen.get() + 1));

    assert!(record.current_code().is_err());
    assert_eq!(record.authenticator().unwrap().counter(), Some(5));
    assert_eq!(events.get(), 0);

    let node = Node::parse(
        r#"<record type="otpkeep.hotp">
             <authenticatordata>
               <secretdata>JBSWY3DPEHPK3PXP</secretdata>
               <counter>18446744073709551615</counter>
             </authenticatordata>
           </record>"#,
    )
    .unwrap();
    let mut record = Record::from_node(&node, None).unwrap();
    assert!(matches!(record.current_code(), Err(AuthError::Code(_))));
    assert_eq!(record.authenticator().unwrap().counter(), Some(u64::MAX));
}
