//! TLS ClientHello에서 SNI를 꺼내는 파서
//!
//! TCP 페이로드의 첫 TLS 레코드만 봅니다. 핸드셰이크가 여러 세그먼트에
//! 걸쳐 쪼개진 경우는 파싱 실패로 처리되고, 호출자가 debug 수준으로
//! 건너뜁니다.

/// TLS 핸드셰이크 레코드 타입
const RECORD_TYPE_HANDSHAKE: u8 = 22;
/// ClientHello 핸드셰이크 메시지 타입
const HANDSHAKE_CLIENT_HELLO: u8 = 1;
/// server_name 확장 번호
const EXTENSION_SERVER_NAME: u16 = 0;
/// server_name 목록 안의 host_name 타입
const SERVER_NAME_TYPE_HOST: u8 = 0;

/// TCP 페이로드에서 SNI 호스트명을 추출합니다.
///
/// ClientHello가 아니거나, SNI 확장이 없거나, 구조가 깨져 있으면
/// `None`입니다.
pub fn parse_client_hello_sni(payload: &[u8]) -> Option<String> {
    // TLS 레코드 헤더: type(1) version(2) length(2)
    if payload.len() < 5 || payload[0] != RECORD_TYPE_HANDSHAKE || payload[1] != 3 {
        return None;
    }
    let record_len = u16::from_be_bytes([payload[3], payload[4]]) as usize;
    let handshake = payload.get(5..5 + record_len)?;

    // 핸드셰이크 헤더: type(1) length(3)
    if handshake.first() != Some(&HANDSHAKE_CLIENT_HELLO) {
        return None;
    }
    let body_len =
        u32::from_be_bytes([0, *handshake.get(1)?, *handshake.get(2)?, *handshake.get(3)?])
            as usize;
    let body = handshake.get(4..4 + body_len)?;

    // client_version(2) + random(32)
    let mut pos = 34usize;

    let session_id_len = *body.get(pos)? as usize;
    pos += 1 + session_id_len;

    let cipher_len = read_u16(body, pos)? as usize;
    pos += 2 + cipher_len;

    let compression_len = *body.get(pos)? as usize;
    pos += 1 + compression_len;

    let extensions_len = read_u16(body, pos)? as usize;
    pos += 2;
    let extensions = body.get(pos..pos + extensions_len)?;

    parse_server_name_extension(extensions)
}

fn parse_server_name_extension(extensions: &[u8]) -> Option<String> {
    let mut pos = 0usize;
    while pos + 4 <= extensions.len() {
        let extension_type = read_u16(extensions, pos)?;
        let extension_len = read_u16(extensions, pos + 2)? as usize;
        pos += 4;
        let data = extensions.get(pos..pos + extension_len)?;

        if extension_type == EXTENSION_SERVER_NAME {
            // server_name_list: list_len(2), 각 항목은 type(1) + len(2) + name
            let _list_len = read_u16(data, 0)?;
            if *data.get(2)? != SERVER_NAME_TYPE_HOST {
                return None;
            }
            let name_len = read_u16(data, 3)? as usize;
            let name = data.get(5..5 + name_len)?;
            return String::from_utf8(name.to_vec()).ok();
        }
        pos += extension_len;
    }
    None
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_be_bytes([
        *data.get(offset)?,
        *data.get(offset + 1)?,
    ]))
}

#[cfg(test)]
pub(crate) fn build_client_hello(server_name: &str) -> Vec<u8> {
    // 테스트용 최소 ClientHello: 세션 ID 없음, 스위트 하나, 압축 없음,
    // server_name 확장 하나
    let name = server_name.as_bytes();

    let mut extension = Vec::new();
    extension.extend_from_slice(&EXTENSION_SERVER_NAME.to_be_bytes());
    let server_name_list_len = 3 + name.len() as u16;
    extension.extend_from_slice(&(server_name_list_len + 2).to_be_bytes());
    extension.extend_from_slice(&server_name_list_len.to_be_bytes());
    extension.push(SERVER_NAME_TYPE_HOST);
    extension.extend_from_slice(&(name.len() as u16).to_be_bytes());
    extension.extend_from_slice(name);

    let mut body = Vec::new();
    body.extend_from_slice(&[3, 3]); // client_version
    body.extend_from_slice(&[0u8; 32]); // random
    body.push(0); // session_id_len
    body.extend_from_slice(&2u16.to_be_bytes()); // cipher_suites len
    body.extend_from_slice(&[0x13, 0x01]);
    body.push(1); // compression_methods len
    body.push(0);
    body.extend_from_slice(&(extension.len() as u16).to_be_bytes());
    body.extend_from_slice(&extension);

    let mut handshake = Vec::new();
    handshake.push(HANDSHAKE_CLIENT_HELLO);
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&body);

    let mut record = Vec::new();
    record.push(RECORD_TYPE_HANDSHAKE);
    record.extend_from_slice(&[3, 1]); // record version
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}
