//! End-to-end protocol tests over real sockets: an in-process listener
//! serving a fixed snapshot, exercised with hand-built PDUs.

use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use ldaptoid_proto::{
    codec, AuthenticationChoice, BindRequest, Control, Filter, LdapMessage, PagedResultsValue,
    PartialAttribute, ProtocolOp, ResultCode, SearchRequest, SearchScope, SubstringFilter,
    PAGED_RESULTS_OID,
};
use ldaptoid_server::{serve, DirectoryTree, ServerContext, SessionConfig, SnapshotProvider};
use ldaptoid_snapshot::{Group, Snapshot, User};

const SUFFIX: &str = "dc=example,dc=com";

struct FixedSnapshots(Option<Arc<Snapshot>>);

impl SnapshotProvider for FixedSnapshots {
    fn current(&self) -> Option<Arc<Snapshot>> {
        self.0.clone()
    }
}

fn user(id: &str, username: &str, uid_number: u32, groups: &[&str]) -> User {
    User {
        id: id.into(),
        username: username.into(),
        display_name: format!("User {username}"),
        email: Some(format!("{username}@example.com")),
        uid_number,
        primary_group_id: "users".into(),
        member_group_ids: groups.iter().map(|g| g.to_string()).collect(),
    }
}

fn snapshot() -> Arc<Snapshot> {
    let users = vec![
        user("u1", "alice", 10_042, &["g1"]),
        user("u2", "bob", 10_043, &[]),
    ];
    let groups = vec![
        Group {
            id: "g1".into(),
            name: "devs".into(),
            description: Some("engineers".into()),
            member_user_ids: vec!["u1".into()],
            member_group_ids: vec![],
            gid_number: 20_010,
            is_synthetic: false,
            truncated: false,
        },
        Group {
            id: "users".into(),
            name: "users".into(),
            description: None,
            member_user_ids: vec![],
            member_group_ids: vec![],
            gid_number: 20_000,
            is_synthetic: true,
            truncated: false,
        },
    ];
    Arc::new(Snapshot::new(users, groups, 1, vec![]))
}

async fn start_server(config: SessionConfig, snapshot: Option<Arc<Snapshot>>) -> TcpStream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let context = Arc::new(ServerContext {
        config: Arc::new(config),
        tree: Arc::new(DirectoryTree::new(SUFFIX).unwrap()),
        snapshots: Arc::new(FixedSnapshots(snapshot)),
    });
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        // Keep the sender alive for the server's lifetime.
        let _hold = _shutdown_tx;
        serve(listener, context, shutdown_rx).await;
    });
    TcpStream::connect(addr).await.unwrap()
}

fn open_config() -> SessionConfig {
    SessionConfig {
        bind_dn: None,
        bind_password: None,
        allow_anonymous_bind: true,
        size_limit: 1000,
    }
}

fn service_config() -> SessionConfig {
    SessionConfig {
        bind_dn: Some(format!("cn=svc,{SUFFIX}")),
        bind_password: Some("s3cret".into()),
        allow_anonymous_bind: false,
        size_limit: 1000,
    }
}

async fn send(stream: &mut TcpStream, message: &LdapMessage) {
    stream.write_all(&codec::encode(message)).await.unwrap();
}

async fn read_message(stream: &mut TcpStream, buffer: &mut BytesMut) -> LdapMessage {
    loop {
        if let Some((message, consumed)) = codec::decode(buffer).unwrap() {
            buffer.advance(consumed);
            return message;
        }
        let read = stream.read_buf(buffer).await.unwrap();
        assert!(read > 0, "server closed the connection mid-response");
    }
}

/// Reads entries until the Done, returning `(entries, done)`.
async fn read_search_response(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    expect_id: i32,
) -> (Vec<LdapMessage>, LdapMessage) {
    let mut entries = Vec::new();
    loop {
        let message = read_message(stream, buffer).await;
        assert_eq!(message.message_id, expect_id);
        match &message.op {
            ProtocolOp::SearchResultEntry(_) => entries.push(message),
            ProtocolOp::SearchResultDone(_) => return (entries, message),
            other => panic!("unexpected op {other:?}"),
        }
    }
}

fn search(
    id: i32,
    base: &str,
    scope: SearchScope,
    filter: Filter,
    attributes: &[&str],
) -> LdapMessage {
    LdapMessage::new(
        id,
        ProtocolOp::SearchRequest(SearchRequest {
            base: base.into(),
            scope,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter,
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
        }),
    )
}

fn bind(id: i32, dn: &str, password: &str) -> LdapMessage {
    LdapMessage::new(
        id,
        ProtocolOp::BindRequest(BindRequest {
            version: 3,
            dn: dn.into(),
            auth: AuthenticationChoice::Simple(password.into()),
        }),
    )
}

fn entry_attr<'a>(message: &'a LdapMessage, name: &str) -> Option<&'a PartialAttribute> {
    match &message.op {
        ProtocolOp::SearchResultEntry(entry) => entry
            .attributes
            .iter()
            .find(|attr| attr.name.eq_ignore_ascii_case(name)),
        _ => None,
    }
}

fn entry_dn(message: &LdapMessage) -> String {
    match &message.op {
        ProtocolOp::SearchResultEntry(entry) => entry.dn.clone(),
        other => panic!("not an entry: {other:?}"),
    }
}

fn done_code(message: &LdapMessage) -> ResultCode {
    match &message.op {
        ProtocolOp::SearchResultDone(result) => result.code,
        other => panic!("not a done: {other:?}"),
    }
}

#[tokio::test]
async fn root_dse_search() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    send(
        &mut stream,
        &search(
            1,
            "",
            SearchScope::BaseObject,
            Filter::Present("objectClass".into()),
            &[],
        ),
    )
    .await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 1).await;

    assert_eq!(entries.len(), 1);
    assert_eq!(entry_dn(&entries[0]), "");
    assert_eq!(
        entry_attr(&entries[0], "namingContexts").unwrap().values,
        vec![SUFFIX.as_bytes().to_vec()]
    );
    assert_eq!(
        entry_attr(&entries[0], "supportedLDAPVersion").unwrap().values,
        vec![b"3".to_vec()]
    );
    assert_eq!(done_code(&done), ResultCode::Success);
}

#[tokio::test]
async fn anonymous_user_search_by_uid() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    send(
        &mut stream,
        &search(
            7,
            &format!("ou=users,{SUFFIX}"),
            SearchScope::WholeSubtree,
            Filter::Equality {
                attribute: "uid".into(),
                value: "alice".into(),
            },
            &["uid", "uidNumber"],
        ),
    )
    .await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 7).await;

    assert_eq!(entries.len(), 1);
    assert_eq!(entry_dn(&entries[0]), format!("uid=alice,ou=users,{SUFFIX}"));
    assert_eq!(
        entry_attr(&entries[0], "uid").unwrap().values,
        vec![b"alice".to_vec()]
    );
    assert_eq!(
        entry_attr(&entries[0], "uidNumber").unwrap().values,
        vec![b"10042".to_vec()]
    );
    assert!(entry_attr(&entries[0], "mail").is_none());
    assert_eq!(done_code(&done), ResultCode::Success);
}

#[tokio::test]
async fn presence_search_with_paged_control_is_acknowledged() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    let mut request = search(
        2,
        &format!("ou=users,{SUFFIX}"),
        SearchScope::WholeSubtree,
        Filter::Present("uid".into()),
        &["uid"],
    );
    request.controls.push(Control {
        oid: PAGED_RESULTS_OID.into(),
        criticality: false,
        value: Some(
            PagedResultsValue {
                size: 1000,
                cookie: Vec::new(),
            }
            .to_ber(),
        ),
    });
    send(&mut stream, &request).await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 2).await;

    // Both users, ascending by uid; the OU itself has no uid.
    assert_eq!(entries.len(), 2);
    assert_eq!(entry_dn(&entries[0]), format!("uid=alice,ou=users,{SUFFIX}"));
    assert_eq!(entry_dn(&entries[1]), format!("uid=bob,ou=users,{SUFFIX}"));
    assert_eq!(done_code(&done), ResultCode::Success);

    let ack = done
        .controls
        .iter()
        .find(|control| control.oid == PAGED_RESULTS_OID)
        .expect("paged results acknowledgement");
    let value = PagedResultsValue::parse(ack.value.as_deref().unwrap()).unwrap();
    assert_eq!(value.size, 0);
    assert!(value.cookie.is_empty());
}

#[tokio::test]
async fn subtree_search_orders_ous_then_users_then_groups() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    send(
        &mut stream,
        &search(
            3,
            SUFFIX,
            SearchScope::WholeSubtree,
            Filter::Present("objectClass".into()),
            &["objectClass"],
        ),
    )
    .await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 3).await;

    let dns: Vec<String> = entries.iter().map(entry_dn).collect();
    assert_eq!(
        dns,
        vec![
            SUFFIX.to_string(),
            format!("ou=users,{SUFFIX}"),
            format!("ou=groups,{SUFFIX}"),
            format!("uid=alice,ou=users,{SUFFIX}"),
            format!("uid=bob,ou=users,{SUFFIX}"),
            format!("cn=devs,ou=groups,{SUFFIX}"),
            format!("cn=users,ou=groups,{SUFFIX}"),
        ]
    );
    assert_eq!(done_code(&done), ResultCode::Success);
}

#[tokio::test]
async fn size_limit_one_truncates_with_code_4() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    let mut request = search(
        4,
        &format!("ou=users,{SUFFIX}"),
        SearchScope::WholeSubtree,
        Filter::Present("uid".into()),
        &["uid"],
    );
    if let ProtocolOp::SearchRequest(ref mut req) = request.op {
        req.size_limit = 1;
    }
    send(&mut stream, &request).await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 4).await;

    assert_eq!(entries.len(), 1);
    assert_eq!(done_code(&done), ResultCode::SizeLimitExceeded);
}

#[tokio::test]
async fn extensible_filter_is_unwilling() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    send(
        &mut stream,
        &search(5, SUFFIX, SearchScope::WholeSubtree, Filter::Extensible, &[]),
    )
    .await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 5).await;
    assert!(entries.is_empty());
    assert_eq!(done_code(&done), ResultCode::UnwillingToPerform);
}

#[tokio::test]
async fn unknown_critical_control_is_rejected() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    let mut request = search(
        6,
        SUFFIX,
        SearchScope::WholeSubtree,
        Filter::Present("objectClass".into()),
        &[],
    );
    request.controls.push(Control {
        oid: "2.16.840.1.113730.3.4.2".into(),
        criticality: true,
        value: None,
    });
    send(&mut stream, &request).await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 6).await;
    assert!(entries.is_empty());
    assert_eq!(done_code(&done), ResultCode::UnavailableCriticalExtension);
}

#[tokio::test]
async fn unknown_noncritical_control_is_ignored() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    let mut request = search(
        6,
        &format!("ou=users,{SUFFIX}"),
        SearchScope::WholeSubtree,
        Filter::Present("uid".into()),
        &["uid"],
    );
    request.controls.push(Control {
        oid: "2.16.840.1.113730.3.4.2".into(),
        criticality: false,
        value: None,
    });
    send(&mut stream, &request).await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 6).await;
    assert_eq!(entries.len(), 2);
    assert_eq!(done_code(&done), ResultCode::Success);
}

#[tokio::test]
async fn bind_failure_then_denied_search_then_recovery() {
    let mut stream = start_server(service_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    send(&mut stream, &bind(1, &format!("cn=svc,{SUFFIX}"), "wrong")).await;
    let response = read_message(&mut stream, &mut buffer).await;
    match &response.op {
        ProtocolOp::BindResponse(result) => {
            assert_eq!(result.code, ResultCode::InvalidCredentials)
        }
        other => panic!("unexpected {other:?}"),
    }

    send(
        &mut stream,
        &search(
            2,
            SUFFIX,
            SearchScope::WholeSubtree,
            Filter::Present("objectClass".into()),
            &[],
        ),
    )
    .await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 2).await;
    assert!(entries.is_empty());
    assert_eq!(done_code(&done), ResultCode::InsufficientAccessRights);

    send(&mut stream, &bind(3, &format!("cn=svc,{SUFFIX}"), "s3cret")).await;
    let response = read_message(&mut stream, &mut buffer).await;
    match &response.op {
        ProtocolOp::BindResponse(result) => assert_eq!(result.code, ResultCode::Success),
        other => panic!("unexpected {other:?}"),
    }

    send(
        &mut stream,
        &search(
            4,
            SUFFIX,
            SearchScope::BaseObject,
            Filter::Present("objectClass".into()),
            &[],
        ),
    )
    .await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 4).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(done_code(&done), ResultCode::Success);
}

#[tokio::test]
async fn search_before_snapshot_is_unavailable() {
    let mut stream = start_server(open_config(), None).await;
    let mut buffer = BytesMut::new();

    send(
        &mut stream,
        &search(
            1,
            SUFFIX,
            SearchScope::WholeSubtree,
            Filter::Present("objectClass".into()),
            &[],
        ),
    )
    .await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 1).await;
    assert!(entries.is_empty());
    assert_eq!(done_code(&done), ResultCode::Unavailable);

    // The RootDSE still answers without a snapshot.
    send(
        &mut stream,
        &search(
            2,
            "",
            SearchScope::BaseObject,
            Filter::Present("objectClass".into()),
            &[],
        ),
    )
    .await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 2).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(done_code(&done), ResultCode::Success);
}

#[tokio::test]
async fn base_outside_suffix_returns_nothing() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    send(
        &mut stream,
        &search(
            1,
            "dc=other,dc=org",
            SearchScope::WholeSubtree,
            Filter::Present("objectClass".into()),
            &[],
        ),
    )
    .await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 1).await;
    assert!(entries.is_empty());
    assert_eq!(done_code(&done), ResultCode::Success);
}

#[tokio::test]
async fn substring_filter_over_the_wire() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    send(
        &mut stream,
        &search(
            1,
            &format!("ou=users,{SUFFIX}"),
            SearchScope::WholeSubtree,
            Filter::Substrings(SubstringFilter {
                attribute: "uid".into(),
                initial: Some("al".into()),
                any: vec![],
                r#final: Some("ce".into()),
            }),
            &["uid"],
        ),
    )
    .await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 1).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entry_dn(&entries[0]), format!("uid=alice,ou=users,{SUFFIX}"));
    assert_eq!(done_code(&done), ResultCode::Success);
}

#[tokio::test]
async fn pipelined_searches_answer_in_order() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    // Two searches in a single write.
    let mut batch = codec::encode(&search(
        10,
        &format!("ou=users,{SUFFIX}"),
        SearchScope::WholeSubtree,
        Filter::Equality {
            attribute: "uid".into(),
            value: "alice".into(),
        },
        &["uid"],
    ));
    batch.extend_from_slice(&codec::encode(&search(
        11,
        &format!("ou=groups,{SUFFIX}"),
        SearchScope::WholeSubtree,
        Filter::Equality {
            attribute: "cn".into(),
            value: "devs".into(),
        },
        &["cn"],
    )));
    stream.write_all(&batch).await.unwrap();

    let (entries, done) = read_search_response(&mut stream, &mut buffer, 10).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(done_code(&done), ResultCode::Success);

    let (entries, done) = read_search_response(&mut stream, &mut buffer, 11).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entry_dn(&entries[0]), format!("cn=devs,ou=groups,{SUFFIX}"));
    assert_eq!(done_code(&done), ResultCode::Success);
}

#[tokio::test]
async fn group_search_exposes_membership() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    send(
        &mut stream,
        &search(
            1,
            &format!("cn=devs,ou=groups,{SUFFIX}"),
            SearchScope::BaseObject,
            Filter::Present("objectClass".into()),
            &[],
        ),
    )
    .await;
    let (entries, done) = read_search_response(&mut stream, &mut buffer, 1).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entry_attr(&entries[0], "member").unwrap().values,
        vec![format!("uid=alice,ou=users,{SUFFIX}").into_bytes()]
    );
    assert_eq!(
        entry_attr(&entries[0], "memberUid").unwrap().values,
        vec![b"alice".to_vec()]
    );
    assert_eq!(
        entry_attr(&entries[0], "gidNumber").unwrap().values,
        vec![b"20010".to_vec()]
    );
    assert_eq!(done_code(&done), ResultCode::Success);
}

#[tokio::test]
async fn unknown_operation_is_protocol_error_on_same_id() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    // ModifyRequest [APPLICATION 6], hand-framed.
    send(
        &mut stream,
        &LdapMessage::new(9, ProtocolOp::Unsupported { tag: 0x66 }),
    )
    .await;
    let response = read_message(&mut stream, &mut buffer).await;
    assert_eq!(response.message_id, 9);
    match &response.op {
        ProtocolOp::SearchResultDone(result) => {
            assert_eq!(result.code, ResultCode::ProtocolError)
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn unbind_closes_the_connection() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;

    send(&mut stream, &LdapMessage::new(1, ProtocolOp::UnbindRequest)).await;
    let mut probe = [0u8; 16];
    let read = stream.read(&mut probe).await.unwrap();
    assert_eq!(read, 0, "expected EOF after unbind");
}

#[tokio::test]
async fn repeated_base_search_is_idempotent_on_one_snapshot() {
    let mut stream = start_server(open_config(), Some(snapshot())).await;
    let mut buffer = BytesMut::new();

    let request = search(
        1,
        &format!("uid=alice,ou=users,{SUFFIX}"),
        SearchScope::BaseObject,
        Filter::Present("objectClass".into()),
        &[],
    );
    send(&mut stream, &request).await;
    let (first, _) = read_search_response(&mut stream, &mut buffer, 1).await;

    let mut again = request.clone();
    again.message_id = 2;
    send(&mut stream, &again).await;
    let (second, _) = read_search_response(&mut stream, &mut buffer, 2).await;

    assert_eq!(first.len(), 1);
    match (&first[0].op, &second[0].op) {
        (ProtocolOp::SearchResultEntry(a), ProtocolOp::SearchResultEntry(b)) => {
            assert_eq!(a, b)
        }
        other => panic!("unexpected {other:?}"),
    }
}
