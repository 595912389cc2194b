// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

use serial_test::parallel;

#[test]
#[parallel]
fn test_search_order_and_visibility() {
    let testtokn = TestToken::new();
    let session = testtokn.user_session();

    let private = testtokn.create(session, &data_template(true, true, "c"));
    let public = testtokn.create(session, &data_template(true, false, "b"));
    let sobj = testtokn.create(session, &data_template(false, false, "a"));

    /* session objects first, then public, then private */
    ret_or_panic!(testtokn.provider.find_objects_init(session, &[]));
    let mut found = Vec::new();
    loop {
        let chunk = ret_or_panic!(testtokn.provider.find_objects(session, 1));
        if chunk.is_empty() {
            break;
        }
        assert_eq!(chunk.len(), 1);
        found.extend(chunk);
    }
    assert_eq!(found, vec![sobj, public, private]);
    assert!(ret_or_panic!(testtokn.provider.find_objects(session, 1)).is_empty());
    ret_or_panic!(testtokn.provider.find_objects_final(session));

    /* other sessions see the token objects only */
    let other = testtokn.open(RO_SESSION);
    assert_eq!(testtokn.find_all(other), vec![public]);

    ret_or_panic!(testtokn.provider.logout(session));
    assert_eq!(testtokn.find_all(session), vec![sobj, public]);
}

#[test]
#[parallel]
fn test_search_by_label() {
    let testtokn = TestToken::new();
    let session = testtokn.open(RW_SESSION);

    let first = testtokn.create(session, &data_template(false, false, "label"));
    testtokn.create(session, &data_template(false, false, "Label"));
    testtokn.create(session, &data_template(false, false, "label2"));
    let second = testtokn.create(session, &secret_template(false, false, "label"));

    let template = vec![make_attribute!(CKA_LABEL, str "label")];
    assert_eq!(testtokn.find(session, &template), vec![first, second]);

    let template = vec![make_attribute!(CKA_LABEL, str "missing")];
    assert!(testtokn.find(session, &template).is_empty());

    /* only a label filter is supported */
    let template = vec![make_attribute!(CKA_CLASS, ulong CKO_DATA)];
    assert_eq!(
        err_rv!(testtokn.provider.find_objects_init(session, &template)),
        CKR_FUNCTION_NOT_SUPPORTED
    );
}

#[test]
#[parallel]
fn test_search_in_chunks() {
    let testtokn = TestToken::new();
    let session = testtokn.open(RW_SESSION);

    let mut handles = Vec::new();
    for i in 0..5 {
        let label = format!("obj{}", i);
        handles.push(testtokn.create(session, &data_template(false, false, &label)));
    }

    ret_or_panic!(testtokn.provider.find_objects_init(session, &[]));
    let mut found = ret_or_panic!(testtokn.provider.find_objects(session, 2));
    assert_eq!(found.len(), 2);
    found.extend(ret_or_panic!(testtokn.provider.find_objects(session, 2)));
    found.extend(ret_or_panic!(testtokn.provider.find_objects(session, 2)));
    assert_eq!(found, handles);
    assert!(ret_or_panic!(testtokn.provider.find_objects(session, 2)).is_empty());

    /* after final nothing is returned until a new search starts */
    ret_or_panic!(testtokn.provider.find_objects_final(session));
    assert!(ret_or_panic!(testtokn.provider.find_objects(session, 10)).is_empty());

    ret_or_panic!(testtokn.provider.find_objects_init(session, &[]));
    assert_eq!(
        ret_or_panic!(testtokn.provider.find_objects(session, 10)),
        handles
    );
}

#[test]
#[parallel]
fn test_search_without_init() {
    let testtokn = TestToken::new();
    let session = testtokn.open(RO_SESSION);
    testtokn.create(session, &data_template(false, false, "x"));

    assert!(ret_or_panic!(testtokn.provider.find_objects(session, 10)).is_empty());
    ret_or_panic!(testtokn.provider.find_objects_final(session));
}

#[test]
#[parallel]
fn test_search_skips_destroyed_objects() {
    let testtokn = TestToken::new();
    let session = testtokn.user_session();

    let first = testtokn.create(session, &data_template(false, false, "1"));
    let second = testtokn.create(session, &data_template(true, false, "2"));
    let third = testtokn.create(session, &data_template(true, true, "3"));

    ret_or_panic!(testtokn.provider.find_objects_init(session, &[]));
    ret_or_panic!(testtokn.provider.destroy_object(session, second));
    assert_eq!(
        ret_or_panic!(testtokn.provider.find_objects(session, 10)),
        vec![first, third]
    );
    ret_or_panic!(testtokn.provider.find_objects_final(session));

    /* the snapshot doesn't pick up objects created later */
    ret_or_panic!(testtokn.provider.find_objects_init(session, &[]));
    let fourth = testtokn.create(session, &data_template(false, false, "4"));
    let found = ret_or_panic!(testtokn.provider.find_objects(session, 10));
    assert_eq!(found, vec![first, third]);
    assert!(!found.contains(&fourth));
}
