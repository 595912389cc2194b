// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

use serial_test::parallel;

#[test]
#[parallel]
fn test_create_session_object_defaults() {
    let testtokn = TestToken::new();
    let session = testtokn.open(RO_SESSION);

    let template = vec![
        make_attribute!(CKA_CLASS, ulong CKO_DATA),
        make_attribute!(CKA_TOKEN, bool false),
        make_attribute!(CKA_PRIVATE, bool false),
    ];
    let handle = testtokn.create(session, &template);
    assert_ne!(handle, CK_INVALID_HANDLE);

    /* defaults filled in from the schema */
    assert_eq!(
        testtokn.get_attr(session, handle, CKA_MODIFIABLE).unwrap(),
        vec![CK_TRUE]
    );
    assert_eq!(
        testtokn.get_attr(session, handle, CKA_LABEL).unwrap(),
        Vec::<u8>::new()
    );
    assert_eq!(
        testtokn.get_attr(session, handle, CKA_VALUE).unwrap(),
        Vec::<u8>::new()
    );
    /* outside the data schema */
    assert_eq!(
        testtokn.get_attr(session, handle, CKA_KEY_TYPE),
        Err(CKR_ATTRIBUTE_TYPE_INVALID)
    );
}

#[test]
#[parallel]
fn test_create_secret_key_defaults() {
    let testtokn = TestToken::new();
    let session = testtokn.open(RW_SESSION);

    let handle = testtokn.create(session, &secret_template(false, false, "k"));
    let check_bool = |t: CK_ATTRIBUTE_TYPE, v: bool| {
        assert_eq!(
            testtokn.get_attr(session, handle, t).unwrap(),
            vec![if v { CK_TRUE } else { CK_FALSE }]
        );
    };
    check_bool(CKA_SENSITIVE, false);
    check_bool(CKA_ENCRYPT, true);
    check_bool(CKA_DECRYPT, true);
    check_bool(CKA_SIGN, true);
    check_bool(CKA_VERIFY, true);
    check_bool(CKA_WRAP, false);
    check_bool(CKA_UNWRAP, false);
    check_bool(CKA_EXTRACTABLE, true);
    check_bool(CKA_DERIVE, false);
    check_bool(CKA_LOCAL, false);
    assert_eq!(
        testtokn.get_attr(session, handle, CKA_KEY_GEN_MECHANISM).unwrap(),
        CK_UNAVAILABLE_INFORMATION.to_ne_bytes().to_vec()
    );
    assert_eq!(
        testtokn.get_attr(session, handle, CKA_VALUE).unwrap(),
        vec![0x2b; 16]
    );
}

#[test]
#[parallel]
fn test_create_incomplete_leaves_nothing() {
    let testtokn = TestToken::new();
    let session = testtokn.user_session();

    /* missing CKA_VALUE */
    let mut template = secret_template(true, false, "incomplete");
    template.pop();
    assert_eq!(
        err_rv!(testtokn.provider.create_object(session, &template)),
        CKR_TEMPLATE_INCOMPLETE
    );

    /* missing CKA_CLASS */
    let template = vec![
        make_attribute!(CKA_TOKEN, bool false),
        make_attribute!(CKA_PRIVATE, bool false),
    ];
    assert_eq!(
        err_rv!(testtokn.provider.create_object(session, &template)),
        CKR_TEMPLATE_INCOMPLETE
    );

    assert_eq!(testtokn.find_all(session).len(), 0);
    assert_eq!(testtokn.flush_count(), 0);
}

#[test]
#[parallel]
fn test_create_inconsistent() {
    let testtokn = TestToken::new();
    let session = testtokn.open(RW_SESSION);

    let mut template = data_template(false, false, "dup");
    template.push(make_attribute!(CKA_LABEL, str "again"));
    assert_eq!(
        err_rv!(testtokn.provider.create_object(session, &template)),
        CKR_TEMPLATE_INCONSISTENT
    );

    let template = vec![
        make_attribute!(CKA_CLASS, ulong CKO_DATA),
        make_attribute!(CKA_TOKEN, bytes [0u8, 0u8]),
        make_attribute!(CKA_PRIVATE, bool false),
    ];
    assert_eq!(
        err_rv!(testtokn.provider.create_object(session, &template)),
        CKR_TEMPLATE_INCONSISTENT
    );

    let template = vec![
        make_attribute!(CKA_CLASS, ulong CKO_CERTIFICATE),
        make_attribute!(CKA_TOKEN, bool false),
        make_attribute!(CKA_PRIVATE, bool false),
    ];
    assert_eq!(
        err_rv!(testtokn.provider.create_object(session, &template)),
        CKR_FUNCTION_FAILED
    );
    assert_eq!(testtokn.find_all(session).len(), 0);
}

#[test]
#[parallel]
fn test_token_object_needs_rw_user() {
    let testtokn = TestToken::new();
    let session = testtokn.open(RW_SESSION);

    assert_eq!(
        err_rv!(testtokn
            .provider
            .create_object(session, &data_template(true, false, "pub"))),
        CKR_SESSION_READ_ONLY
    );
    assert_eq!(testtokn.flush_count(), 0);

    ret_or_panic!(testtokn.provider.login(session, CKU_USER));
    let handle = testtokn.create(session, &data_template(true, false, "pub"));
    assert_eq!(testtokn.flush_count(), 1);

    /* public token objects are readable without login */
    ret_or_panic!(testtokn.provider.logout(session));
    assert_eq!(
        testtokn.get_attr(session, handle, CKA_LABEL).unwrap(),
        b"pub".to_vec()
    );
}

#[test]
#[parallel]
fn test_create_rollback_on_flush_failure() {
    let testtokn = TestToken::new();
    let session = testtokn.user_session();

    testtokn.fail_flushes(true);
    assert_eq!(
        err_rv!(testtokn
            .provider
            .create_object(session, &data_template(true, true, "lost"))),
        CKR_FUNCTION_FAILED
    );
    assert_eq!(testtokn.find_all(session).len(), 0);

    testtokn.fail_flushes(false);
    let handle = testtokn.create(session, &data_template(true, true, "kept"));
    assert_eq!(testtokn.find_all(session), vec![handle]);
}

#[test]
#[parallel]
fn test_destroy_objects() {
    let testtokn = TestToken::new();
    let session = testtokn.user_session();

    let sobj = testtokn.create(session, &data_template(false, false, "s"));
    let tobj = testtokn.create(session, &data_template(true, false, "t"));

    ret_or_panic!(testtokn.provider.destroy_object(session, sobj));
    assert_eq!(
        testtokn.get_attr(session, sobj, CKA_LABEL),
        Err(CKR_OBJECT_HANDLE_INVALID)
    );
    assert_eq!(
        err_rv!(testtokn.provider.destroy_object(session, sobj)),
        CKR_OBJECT_HANDLE_INVALID
    );

    /* a failed flush keeps the object in place */
    testtokn.fail_flushes(true);
    assert_eq!(
        err_rv!(testtokn.provider.destroy_object(session, tobj)),
        CKR_FUNCTION_FAILED
    );
    assert_eq!(
        testtokn.get_attr(session, tobj, CKA_LABEL).unwrap(),
        b"t".to_vec()
    );
    testtokn.fail_flushes(false);

    /* read only sessions can't destroy token objects */
    let ro_session = testtokn.open(RO_SESSION);
    assert_eq!(
        err_rv!(testtokn.provider.destroy_object(ro_session, tobj)),
        CKR_SESSION_READ_ONLY
    );

    ret_or_panic!(testtokn.provider.destroy_object(session, tobj));
    assert_eq!(testtokn.find_all(session).len(), 0);
}

#[test]
#[parallel]
fn test_session_objects_are_private_to_session() {
    let testtokn = TestToken::new();
    let session1 = testtokn.open(RW_SESSION);
    let session2 = testtokn.open(RW_SESSION);

    let handle = testtokn.create(session1, &data_template(false, false, "s1"));
    assert_eq!(
        testtokn.get_attr(session2, handle, CKA_LABEL),
        Err(CKR_OBJECT_HANDLE_INVALID)
    );

    /* closing the session releases its objects */
    ret_or_panic!(testtokn.provider.close_session(session1));
    assert_eq!(
        err_rv!(testtokn.provider.get_object_size(session1, handle)),
        CKR_SESSION_HANDLE_INVALID
    );
    assert_eq!(testtokn.find_all(session2).len(), 0);
}

#[test]
#[parallel]
fn test_object_size_and_copy() {
    let testtokn = TestToken::new();
    let session = testtokn.open(RO_SESSION);

    let handle = testtokn.create(session, &data_template(false, false, "sz"));
    let size = ret_or_panic!(testtokn.provider.get_object_size(session, handle));
    assert!(size > 0);

    /* a longer label makes a bigger object */
    let template = vec![make_attribute!(CKA_LABEL, str "a much longer label")];
    ret_or_panic!(testtokn
        .provider
        .set_attribute_value(session, handle, &template));
    let bigger = ret_or_panic!(testtokn.provider.get_object_size(session, handle));
    assert_eq!(bigger, size + 17);

    assert_eq!(
        err_rv!(testtokn.provider.copy_object(session, handle, &[])),
        CKR_FUNCTION_NOT_SUPPORTED
    );
    assert_eq!(
        err_rv!(testtokn.provider.get_object_size(session, handle + 100)),
        CKR_OBJECT_HANDLE_INVALID
    );
}
