use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command};
use std::time::Duration;

/// Kills the spawned server when a test panics before the shutdown command.
struct ServerGuard {
    child: Child,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn start_server(dir: &std::path::Path, port: u16) -> ServerGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_cdr_server"))
        .env("CDR_PORT", port.to_string())
        .env("CDR_STORAGE_DIR", dir)
        .env("CDR_SEED_ADMIN_PASSWORD", "secret")
        .env("SUPPRESS_CDR_COMMAND_LOGGING", "1")
        .spawn()
        .unwrap();
    ServerGuard { child }
}

fn connect(port: u16) -> TcpStream {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)) {
            return stream;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("server did not start listening on port {port}");
}

fn roundtrip(stream: &mut TcpStream, xml: &str) -> String {
    let bytes = xml.as_bytes();
    stream
        .write_all(&(bytes.len() as u32).to_be_bytes())
        .unwrap();
    stream.write_all(bytes).unwrap();
    stream.flush().unwrap();

    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).unwrap();
    let len = u32::from_be_bytes(prefix) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).unwrap();
    String::from_utf8(payload).unwrap()
}

fn extract(response: &str, open: &str, close: &str) -> String {
    let start = response.find(open).map(|at| at + open.len()).unwrap();
    let end = response[start..].find(close).map(|at| start + at).unwrap();
    response[start..end].to_string()
}

fn logon(stream: &mut TcpStream, name: &str, password: &str) -> String {
    let response = roundtrip(
        stream,
        &format!(
            "<CdrCommandSet><CdrCommand><CdrLogon><Name>{name}</Name>\
             <Password>{password}</Password></CdrLogon></CdrCommand></CdrCommandSet>"
        ),
    );
    assert!(response.contains("Status='success'"), "logon failed: {response}");
    extract(&response, "<SessionId>", "</SessionId>")
}

#[test]
fn full_session_lifecycle_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let mut guard = start_server(dir.path(), port);
    let mut stream = connect(port);

    // Seeded admin can log on; the guest account exists with no password.
    let session = logon(&mut stream, "admin", "secret");
    assert_eq!(session.len(), 32);
    let guest = logon(&mut stream, "guest", "");
    assert_ne!(session, guest);

    // A command without a session fails; the batch still answers.
    let response = roundtrip(
        &mut stream,
        "<CdrCommandSet><CdrCommand><CdrGetFilterSets/></CdrCommand></CdrCommandSet>",
    );
    assert!(response.contains("Status='error'"));
    assert!(response.contains("missing or invalid session"));

    // Mid-batch failure leaves the surrounding commands untouched, order
    // and CmdId attributes preserved.
    let response = roundtrip(
        &mut stream,
        &format!(
            "<CdrCommandSet><SessionId>{session}</SessionId>\
             <CdrCommand CmdId='a'><CdrGetFilterSets/></CdrCommand>\
             <CdrCommand CmdId='b'><CdrGetFilterSet>\
             <FilterSetName>No Such Set</FilterSetName></CdrGetFilterSet></CdrCommand>\
             <CdrCommand CmdId='c'><CdrGetFilters/></CdrCommand>\
             </CdrCommandSet>"
        ),
    );
    let a = response.find("CmdId='a'").unwrap();
    let b = response.find("CmdId='b'").unwrap();
    let c = response.find("CmdId='c'").unwrap();
    assert!(a < b && b < c);
    assert!(response.contains("<CdrResponse CmdId='a' Status='success'"));
    assert!(response.contains("<CdrResponse CmdId='b' Status='error'"));
    assert!(response.contains("<CdrResponse CmdId='c' Status='success'"));

    // Filter set administration under the seeded grants.
    let response = roundtrip(
        &mut stream,
        &format!(
            "<CdrCommandSet><SessionId>{session}</SessionId>\
             <CdrCommand><CdrAddFilterSet>\
             <FilterSet Name='Publishing' Description='Export chain'>\
             <Filter DocId='CDR0000000005'/><Filter DocId='CDR0000000007'/>\
             </FilterSet></CdrAddFilterSet></CdrCommand></CdrCommandSet>"
        ),
    );
    assert!(response.contains("<CdrAddFilterSetResp TotalFilters='2'/>"), "{response}");

    let response = roundtrip(
        &mut stream,
        &format!(
            "<CdrCommandSet><SessionId>{session}</SessionId>\
             <CdrCommand><CdrGetFilterSets/></CdrCommand></CdrCommandSet>"
        ),
    );
    assert!(response.contains("<FilterSet>Publishing</FilterSet>"));

    // The guest session has no administrative grants.
    let response = roundtrip(
        &mut stream,
        &format!(
            "<CdrCommandSet><SessionId>{guest}</SessionId>\
             <CdrCommand><CdrDelFilterSet>\
             <FilterSetName>Publishing</FilterSetName></CdrDelFilterSet></CdrCommand>\
             </CdrCommandSet>"
        ),
    );
    assert!(response.contains("Status='error'"));
    assert!(response.contains("not authorized"));

    // A no-filter chain passes the document through unchanged.
    let response = roundtrip(
        &mut stream,
        &format!(
            "<CdrCommandSet><SessionId>{session}</SessionId>\
             <CdrCommand><CdrFilter>\
             <Document><![CDATA[<Doc>payload</Doc>]]></Document>\
             </CdrFilter></CdrCommand></CdrCommandSet>"
        ),
    );
    assert!(response.contains("<Document><![CDATA[<Doc>payload</Doc>]]></Document>"), "{response}");

    // Control values round through Create + Install.
    let response = roundtrip(
        &mut stream,
        &format!(
            "<CdrCommandSet><SessionId>{session}</SessionId>\
             <CdrCommand><CdrSetCtl><Ctl><Action>Create</Action>\
             <Group>Publishing</Group><Key>Throttle</Key><Value>25</Value>\
             </Ctl></CdrSetCtl></CdrCommand>\
             <CdrCommand><CdrSetCtl><Ctl><Action>Install</Action></Ctl>\
             </CdrSetCtl></CdrCommand></CdrCommandSet>"
        ),
    );
    assert_eq!(response.matches("<CdrSetCtlResp/>").count(), 2, "{response}");

    // Shutdown answers before the process exits.
    let response = roundtrip(
        &mut stream,
        &format!(
            "<CdrCommandSet><SessionId>{session}</SessionId>\
             <CdrCommand><CdrShutdown/></CdrCommand></CdrCommandSet>"
        ),
    );
    assert!(response.contains("<CdrShutdownResp/>"), "{response}");

    for _ in 0..100 {
        if let Ok(Some(status)) = guard.child.try_wait() {
            assert!(status.success());
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("server did not exit after CdrShutdown");
}

#[test]
fn non_protocol_traffic_is_answered_and_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let _guard = start_server(dir.path(), port);
    let mut stream = connect(port);

    let response = roundtrip(&mut stream, "GET / HTTP/1.1\r\n\r\n");
    assert!(response.contains("not a CdrCommandSet"), "{response}");

    // The server closes the connection after a framing rejection.
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn malformed_xml_gets_a_batch_level_error() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let _guard = start_server(dir.path(), port);
    let mut stream = connect(port);

    let response = roundtrip(&mut stream, "<CdrCommandSet><unclosed>");
    assert!(response.starts_with("<CdrResponseSet Time='"), "{response}");
    assert!(response.contains("unparsable XML"), "{response}");

    // The connection survives a parse failure inside a framed request.
    let session = logon(&mut stream, "guest", "");
    assert!(!session.is_empty());
}
