//! 임베디드 로그 구조 KV 엔진
//!
//! 단일 append-only 로그 파일과 인메모리 정렬 인덱스로 구성됩니다.
//! 같은 키를 다시 쓰면 새 레코드가 이전 레코드를 가리고, 가려진
//! 바이트는 stale로 집계되어 임계치를 넘으면 GC가 로그를 재작성합니다.
//!
//! # 레코드 포맷 (리틀 엔디언)
//! ```text
//! crc32(body) u32 | key_len u32 | key | val_len u32 | value
//! ```
//! 열 때 전체 로그를 스캔하며, CRC가 깨졌거나 잘린 꼬리 레코드는
//! 그 지점에서 잘라냅니다. 그 앞의 레코드들은 모두 유지됩니다.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;

const LOG_FILE: &str = "append.log";
const COMPACT_FILE: &str = "append.log.compact";

/// 레코드 헤더 고정 길이: crc(4) + key_len(4) + val_len(4)
const RECORD_OVERHEAD: u64 = 12;

/// GC 한 사이클의 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOutcome {
    /// 로그를 재작성하고 `reclaimed_bytes`만큼 회수함
    Rewritten {
        /// 회수한 바이트 수
        reclaimed_bytes: u64,
    },
    /// stale 비율이 임계치 미만 — 정상 상태이며 에러가 아님
    NothingToRewrite,
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    value_offset: u64,
    value_len: u32,
    record_len: u64,
}

struct EngineInner {
    file: File,
    index: BTreeMap<Vec<u8>, IndexEntry>,
    /// 다음 레코드가 기록될 오프셋 (== 유효 파일 길이)
    tail: u64,
    /// 가려진 레코드들의 총 바이트
    stale_bytes: u64,
}

/// 로그 구조 KV 엔진
///
/// 모든 연산은 내부 뮤텍스로 직렬화됩니다. 키 공간은 호출자(저장소
/// 계층)가 `ips` / `<ip>-meta` / `<ip>-action` 네임스페이스로 나눠
/// 사용합니다.
pub struct LogEngine {
    dir: PathBuf,
    inner: Mutex<EngineInner>,
}

impl LogEngine {
    /// 디렉토리를 만들고 로그를 스캔하여 엔진을 엽니다.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|e| StoreError::Open {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let log_path = dir.join(LOG_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&log_path)
            .map_err(|e| StoreError::Open {
                path: log_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        let (index, stale_bytes, tail) = scan_log(&buffer);
        if tail < buffer.len() as u64 {
            warn!(
                valid_bytes = tail,
                file_bytes = buffer.len(),
                "truncating torn tail record"
            );
            file.set_len(tail)?;
            file.sync_all()?;
        }

        debug!(
            keys = index.len(),
            bytes = tail,
            stale = stale_bytes,
            path = %log_path.display(),
            "log engine opened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            inner: Mutex::new(EngineInner {
                file,
                index,
                tail,
                stale_bytes,
            }),
        })
    }

    /// 키의 현재 값을 읽습니다. 없으면 `None`입니다.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.index.get(key).copied() else {
            return Ok(None);
        };

        let mut value = vec![0u8; entry.value_len as usize];
        inner.file.seek(SeekFrom::Start(entry.value_offset))?;
        inner.file.read_exact(&mut value)?;
        Ok(Some(value))
    }

    /// 키에 새 값을 기록합니다. 이전 값은 stale로 집계됩니다.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let record = encode_record(key, value);
        let mut inner = self.inner.lock();

        let record_start = inner.tail;
        inner.file.seek(SeekFrom::Start(record_start))?;
        inner.file.write_all(&record)?;

        let entry = IndexEntry {
            value_offset: record_start + RECORD_OVERHEAD + key.len() as u64,
            value_len: value.len() as u32,
            record_len: record.len() as u64,
        };
        inner.tail += record.len() as u64;
        if let Some(previous) = inner.index.insert(key.to_vec(), entry) {
            inner.stale_bytes += previous.record_len;
        }
        Ok(())
    }

    /// stale 비율이 `threshold` 이상이면 살아 있는 레코드만으로 로그를
    /// 재작성합니다.
    ///
    /// 새 로그는 임시 파일에 완성·동기화한 뒤 원자적으로 교체하므로
    /// 재작성 중 크래시가 나도 이전 로그가 남습니다.
    pub fn run_value_gc(&self, threshold: f64) -> Result<GcOutcome, StoreError> {
        let mut inner = self.inner.lock();

        if inner.tail == 0 {
            return Ok(GcOutcome::NothingToRewrite);
        }
        let ratio = inner.stale_bytes as f64 / inner.tail as f64;
        if ratio < threshold {
            return Ok(GcOutcome::NothingToRewrite);
        }

        let compact_path = self.dir.join(COMPACT_FILE);
        let log_path = self.dir.join(LOG_FILE);

        let mut compact = File::create(&compact_path)?;
        let mut new_index = BTreeMap::new();
        let mut new_tail = 0u64;

        let entries: Vec<(Vec<u8>, IndexEntry)> = inner
            .index
            .iter()
            .map(|(k, e)| (k.clone(), *e))
            .collect();
        for (key, entry) in entries {
            let mut value = vec![0u8; entry.value_len as usize];
            inner.file.seek(SeekFrom::Start(entry.value_offset))?;
            inner.file.read_exact(&mut value)?;

            let record = encode_record(&key, &value);
            compact.write_all(&record)?;
            new_index.insert(
                key.clone(),
                IndexEntry {
                    value_offset: new_tail + RECORD_OVERHEAD + key.len() as u64,
                    value_len: entry.value_len,
                    record_len: record.len() as u64,
                },
            );
            new_tail += record.len() as u64;
        }
        compact.sync_all()?;
        drop(compact);

        fs::rename(&compact_path, &log_path)?;
        let file = OpenOptions::new().read(true).write(true).open(&log_path)?;

        let reclaimed = inner.tail - new_tail;
        inner.file = file;
        inner.index = new_index;
        inner.tail = new_tail;
        inner.stale_bytes = 0;

        Ok(GcOutcome::Rewritten {
            reclaimed_bytes: reclaimed,
        })
    }

    /// 버퍼된 내용을 디스크에 동기화합니다.
    pub fn flush(&self) -> Result<(), StoreError> {
        let inner = self.inner.lock();
        inner.file.sync_all()?;
        Ok(())
    }

    /// 인덱스에 있는 키 수
    pub fn key_count(&self) -> usize {
        self.inner.lock().index.len()
    }

    /// 현재 로그 크기 (바이트)
    pub fn size_on_disk(&self) -> u64 {
        self.inner.lock().tail
    }
}

fn encode_record(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(8 + key.len() + value.len());
    body.extend_from_slice(&(key.len() as u32).to_le_bytes());
    body.extend_from_slice(key);
    body.extend_from_slice(&(value.len() as u32).to_le_bytes());
    body.extend_from_slice(value);

    let crc = crc32fast::hash(&body);
    let mut record = Vec::with_capacity(4 + body.len());
    record.extend_from_slice(&crc.to_le_bytes());
    record.extend_from_slice(&body);
    record
}

/// 로그 버퍼를 스캔하여 (인덱스, stale 바이트, 유효 길이)를 만듭니다.
///
/// 손상되었거나 잘린 레코드를 만나면 그 지점에서 스캔을 멈춥니다.
fn scan_log(buffer: &[u8]) -> (BTreeMap<Vec<u8>, IndexEntry>, u64, u64) {
    let mut index: BTreeMap<Vec<u8>, IndexEntry> = BTreeMap::new();
    let mut stale_bytes = 0u64;
    let mut offset = 0usize;

    while offset < buffer.len() {
        let Some(record) = parse_record(&buffer[offset..]) else {
            break;
        };

        let entry = IndexEntry {
            value_offset: (offset + record.value_start) as u64,
            value_len: record.value_len,
            record_len: record.record_len as u64,
        };
        if let Some(previous) = index.insert(record.key, entry) {
            stale_bytes += previous.record_len;
        }
        offset += record.record_len;
    }

    (index, stale_bytes, offset as u64)
}

struct ParsedRecord {
    key: Vec<u8>,
    value_start: usize,
    value_len: u32,
    record_len: usize,
}

fn parse_record(buffer: &[u8]) -> Option<ParsedRecord> {
    if buffer.len() < RECORD_OVERHEAD as usize {
        return None;
    }
    let crc = u32::from_le_bytes(buffer[0..4].try_into().ok()?);
    let key_len = u32::from_le_bytes(buffer[4..8].try_into().ok()?) as usize;

    let val_len_start = 8 + key_len;
    if buffer.len() < val_len_start + 4 {
        return None;
    }
    let value_len =
        u32::from_le_bytes(buffer[val_len_start..val_len_start + 4].try_into().ok()?) as usize;

    let record_len = RECORD_OVERHEAD as usize + key_len + value_len;
    if buffer.len() < record_len {
        return None;
    }

    let body = &buffer[4..record_len];
    if crc32fast::hash(body) != crc {
        return None;
    }

    Some(ParsedRecord {
        key: buffer[8..8 + key_len].to_vec(),
        value_start: val_len_start + 4,
        value_len: value_len as u32,
        record_len,
    })
}
