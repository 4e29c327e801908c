// ── Versioned script upload ──
//
// The device KVS entry `script/<basename>` holds the SHA-1 of the
// canonical script text. An upload whose hash matches is skipped.

use myhome_api::shelly::methods::{
    KvsDelete, KvsGet, KvsKey, KvsSet, KvsSetParams, NoParams, ScriptConfigPatch, ScriptCreate,
    ScriptCreateParams, ScriptDelete, ScriptEntry, ScriptGetCode, ScriptGetCodeParams, ScriptId,
    ScriptList, ScriptPutCode, ScriptPutCodeParams, ScriptSetConfig, ScriptSetConfigParams, ScriptStart, ScriptStop,
};
use serde::Serialize;
use serde_json::Value;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::shelly::{DeviceRpc, call};

/// Upper bound for one `Script.PutCode` chunk.
const CHUNK_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub id: u32,
    /// The code was (re)written.
    pub uploaded: bool,
    /// `Script.Start` was issued.
    pub started: bool,
}

/// Line endings normalized to LF and trailing whitespace removed.
pub fn canonical(content: &str) -> String {
    content.replace("\r\n", "\n").trim_end().to_owned()
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(canonical(content).as_bytes());
    hex::encode(hasher.finalize())
}

pub fn basename(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

pub fn kvs_key(name: &str) -> String {
    format!("script/{}", basename(name))
}

async fn find_script(
    rpc: &(impl DeviceRpc + ?Sized),
    name: &str,
) -> Result<Option<ScriptEntry>, CoreError> {
    let list = call::<ScriptList>(rpc, &NoParams {}).await?;
    Ok(list.scripts.into_iter().find(|s| s.name == name))
}

/// The stored hash, if any. A missing key is not an error.
async fn stored_hash(rpc: &(impl DeviceRpc + ?Sized), key: &str) -> Option<String> {
    match call::<KvsGet>(rpc, &KvsKey { key: key.to_owned() }).await {
        Ok(v) => v.value.as_str().map(str::to_owned),
        Err(e) => {
            debug!(device = rpc.device_id(), key, error = %e, "no stored script hash");
            None
        }
    }
}

/// Upload `content` as script `name` unless the device already runs the
/// same version.
pub async fn upload_with_version(
    rpc: &(impl DeviceRpc + ?Sized),
    name: &str,
    content: &str,
    force: bool,
) -> Result<UploadOutcome, CoreError> {
    let name = basename(name);
    let key = kvs_key(name);
    let hash = content_hash(content);
    let existing = find_script(rpc, name).await?;

    if let Some(script) = existing.as_ref().filter(|_| !force) {
        if stored_hash(rpc, &key).await.as_deref() == Some(hash.as_str()) {
            let started = !script.running;
            if started {
                call::<ScriptStart>(rpc, &ScriptId { id: script.id }).await?;
            }
            debug!(device = rpc.device_id(), script = name, started, "script up to date");
            return Ok(UploadOutcome {
                id: script.id,
                uploaded: false,
                started,
            });
        }
    }

    let id = match existing {
        Some(script) => {
            if script.running {
                call::<ScriptStop>(rpc, &ScriptId { id: script.id }).await?;
            }
            script.id
        }
        None => {
            call::<ScriptCreate>(
                rpc,
                &ScriptCreateParams {
                    name: name.to_owned(),
                },
            )
            .await?
            .id
        }
    };

    let code = canonical(content);
    write_code(rpc, id, &code).await?;

    if let Err(e) = call::<KvsSet>(
        rpc,
        &KvsSetParams {
            key: key.clone(),
            value: Value::String(hash),
        },
    )
    .await
    {
        warn!(device = rpc.device_id(), key = %key, error = %e, "script hash not stored");
    }

    call::<ScriptSetConfig>(
        rpc,
        &ScriptSetConfigParams {
            id,
            config: ScriptConfigPatch {
                name: None,
                enable: Some(true),
            },
        },
    )
    .await?;
    call::<ScriptStart>(rpc, &ScriptId { id }).await?;

    debug!(device = rpc.device_id(), script = name, id, bytes = code.len(), "script uploaded");
    Ok(UploadOutcome {
        id,
        uploaded: true,
        started: true,
    })
}

/// Remove script `name` and its stored hash. Returns the deleted id.
pub async fn delete_with_version(
    rpc: &(impl DeviceRpc + ?Sized),
    name: &str,
) -> Result<u32, CoreError> {
    let name = basename(name);
    let key = kvs_key(name);
    if let Err(e) = call::<KvsDelete>(rpc, &KvsKey { key: key.clone() }).await {
        debug!(device = rpc.device_id(), key = %key, error = %e, "script hash not deleted");
    }
    let script = find_script(rpc, name)
        .await?
        .ok_or_else(|| CoreError::not_found("script", name))?;
    if script.running {
        call::<ScriptStop>(rpc, &ScriptId { id: script.id }).await?;
    }
    call::<ScriptDelete>(rpc, &ScriptId { id: script.id }).await?;
    Ok(script.id)
}

/// Replace the code of script `id`, chunked to fit one request each.
pub(crate) async fn write_code(
    rpc: &(impl DeviceRpc + ?Sized),
    id: u32,
    code: &str,
) -> Result<(), CoreError> {
    for (i, chunk) in chunks(code, CHUNK_BYTES).into_iter().enumerate() {
        call::<ScriptPutCode>(
            rpc,
            &ScriptPutCodeParams {
                id,
                code: chunk.to_owned(),
                append: i > 0,
            },
        )
        .await?;
    }
    Ok(())
}

/// The full code of script `id`, read piece by piece.
pub(crate) async fn read_code(rpc: &(impl DeviceRpc + ?Sized), id: u32) -> Result<String, CoreError> {
    let mut code = String::new();
    loop {
        let piece = call::<ScriptGetCode>(
            rpc,
            &ScriptGetCodeParams {
                id,
                offset: code.len(),
            },
        )
        .await?;
        code.push_str(&piece.data);
        if piece.left == 0 || piece.data.is_empty() {
            return Ok(code);
        }
    }
}

/// Split on char boundaries into pieces of at most `max` bytes.
fn chunks(code: &str, max: usize) -> Vec<&str> {
    if code.is_empty() {
        return vec![""];
    }
    let mut out = Vec::new();
    let mut rest = code;
    while !rest.is_empty() {
        let mut end = rest.len().min(max);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        out.push(head);
        rest = tail;
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::FakeDevice;

    #[test]
    fn canonical_form_ignores_line_endings_and_trailing_space() {
        assert_eq!(canonical("a\r\nb  \r\n\n"), "a\nb");
        assert_eq!(content_hash("print(1)\r\n"), content_hash("print(1)"));
        assert_ne!(content_hash("print(1)"), content_hash("print(2)"));
        assert_eq!(content_hash("").len(), 40);
    }

    #[test]
    fn kvs_key_uses_basename() {
        assert_eq!(kvs_key("assets/watchdog.js"), "script/watchdog.js");
        assert_eq!(kvs_key("watchdog.js"), "script/watchdog.js");
    }

    #[test]
    fn chunks_respect_char_boundaries() {
        let text = "é".repeat(700);
        let parts = chunks(&text, CHUNK_BYTES);
        assert!(parts.iter().all(|p| p.len() <= CHUNK_BYTES));
        assert_eq!(parts.concat(), text);
        assert_eq!(chunks("", CHUNK_BYTES), vec![""]);
    }

    #[tokio::test]
    async fn first_upload_creates_writes_and_starts() {
        let dev = FakeDevice::new("shellyplus1-a");
        let out = upload_with_version(&*dev, "hello.js", "print(1)\n", false)
            .await
            .unwrap();
        assert_eq!(
            out,
            UploadOutcome {
                id: 1,
                uploaded: true,
                started: true
            }
        );
        assert_eq!(
            dev.writes(),
            vec![
                "Script.Create",
                "Script.PutCode",
                "KVS.Set",
                "Script.SetConfig",
                "Script.Start"
            ]
        );
        let state = dev.state.lock();
        assert_eq!(state.scripts[0].code, "print(1)");
        assert!(state.scripts[0].running && state.scripts[0].enable);
        assert_eq!(state.kvs["script/hello.js"], content_hash("print(1)"));
    }

    #[tokio::test]
    async fn same_content_is_skipped() {
        let dev = FakeDevice::new("shellyplus1-a");
        upload_with_version(&*dev, "hello.js", "print(1)", false)
            .await
            .unwrap();
        dev.clear_calls();

        // Still running: nothing to write at all.
        let out = upload_with_version(&*dev, "hello.js", "print(1)", false)
            .await
            .unwrap();
        assert!(!out.uploaded && !out.started);
        assert!(dev.writes().is_empty());

        // Stopped: only a start.
        dev.state.lock().scripts[0].running = false;
        dev.clear_calls();
        let out = upload_with_version(&*dev, "hello.js", "print(1)", false)
            .await
            .unwrap();
        assert!(out.started && !out.uploaded);
        assert_eq!(dev.writes(), vec!["Script.Start"]);
    }

    #[tokio::test]
    async fn changed_content_or_force_reuploads() {
        let dev = FakeDevice::new("shellyplus1-a");
        upload_with_version(&*dev, "hello.js", "print(1)", false)
            .await
            .unwrap();
        dev.clear_calls();

        let out = upload_with_version(&*dev, "hello.js", "print(2)", false)
            .await
            .unwrap();
        assert!(out.uploaded);
        assert_eq!(out.id, 1);
        assert_eq!(
            dev.writes(),
            vec![
                "Script.Stop",
                "Script.PutCode",
                "KVS.Set",
                "Script.SetConfig",
                "Script.Start"
            ]
        );
        assert_eq!(dev.state.lock().scripts[0].code, "print(2)");

        dev.clear_calls();
        let out = upload_with_version(&*dev, "hello.js", "print(2)", true)
            .await
            .unwrap();
        assert!(out.uploaded);
        assert!(dev.writes().contains(&"Script.PutCode".to_owned()));
    }

    #[tokio::test]
    async fn large_scripts_are_appended_in_chunks() {
        let dev = FakeDevice::new("shellyplus1-a");
        let code = "let x = 1;\n".repeat(300);
        upload_with_version(&*dev, "big.js", &code, false)
            .await
            .unwrap();
        let puts = dev
            .methods()
            .into_iter()
            .filter(|m| m == "Script.PutCode")
            .count();
        assert_eq!(puts, canonical(&code).len().div_ceil(CHUNK_BYTES));
        assert_eq!(dev.state.lock().scripts[0].code, canonical(&code));
    }

    #[tokio::test]
    async fn delete_removes_script_and_hash() {
        let dev = FakeDevice::new("shellyplus1-a");
        upload_with_version(&*dev, "hello.js", "print(1)", false)
            .await
            .unwrap();
        assert_eq!(delete_with_version(&*dev, "hello.js").await.unwrap(), 1);
        let state = dev.state.lock();
        assert!(state.scripts.is_empty());
        assert!(!state.kvs.contains_key("script/hello.js"));
        drop(state);

        let err = delete_with_version(&*dev, "hello.js").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }
}
