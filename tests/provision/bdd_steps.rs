//! BDD step definitions for ignition volume provisioning.

use std::fs;

use ignivol::{ErrorKind, IgnitionRequest, reverse_resolve};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::ProvisionWorld;
use crate::ignition::INLINE_IGNITION;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("failed to prepare ignition file: {0}")]
    Setup(String),
}

fn parse_kind(kind: &str) -> Result<ErrorKind, StepError> {
    match kind {
        "NotFound" => Ok(ErrorKind::NotFound),
        "InvalidContent" => Ok(ErrorKind::InvalidContent),
        "Io" => Ok(ErrorKind::Io),
        "Backend" => Ok(ErrorKind::Backend),
        "IdentifierFormat" => Ok(ErrorKind::IdentifierFormat),
        other => Err(StepError::Assertion(format!("unknown error kind {other}"))),
    }
}

fn create(provision_world: &ProvisionWorld, name: &str, pool: &str, content: &str) {
    let request = IgnitionRequest::new(name, pool, content);
    match provision_world.session.create(&request) {
        Ok(id) => {
            provision_world.created.replace(Some(id));
        }
        Err(err) => provision_world.record_failure(err),
    }
}

fn resolve(provision_world: &ProvisionWorld, id: &str) {
    match reverse_resolve(provision_world.session.backend(), id) {
        Ok(resolved) => {
            provision_world.resolved.replace(Some(resolved));
        }
        Err(err) => provision_world.record_failure(err),
    }
}

#[given("a storage pool \"{pool}\"")]
fn storage_pool(provision_world: &ProvisionWorld, pool: String) {
    provision_world.backend.add_pool(&pool);
}

#[given("an ignition file of \"{size}\" bytes")]
fn ignition_file(provision_world: &ProvisionWorld, size: usize) -> Result<(), StepError> {
    let path = provision_world.scratch.path().join("boot.ign");
    let payload: Vec<u8> = (0..=u8::MAX).cycle().take(size).collect();
    fs::write(&path, payload).map_err(|err| StepError::Setup(err.to_string()))?;
    provision_world.ignition_file.replace(Some(path));
    Ok(())
}

#[given("pool refreshes fail \"{count}\" times")]
fn refreshes_fail(provision_world: &ProvisionWorld, count: u32) {
    provision_world.backend.fail_refreshes(count);
}

#[given("created volumes report an empty key")]
fn empty_keys(provision_world: &ProvisionWorld) {
    provision_world.backend.return_empty_keys();
}

#[given("volume uploads fail")]
fn uploads_fail(provision_world: &ProvisionWorld) {
    provision_world.backend.fail_upload();
}

#[when("I create volume \"{name}\" in pool \"{pool}\" with the sample inline ignition")]
fn create_inline(provision_world: &ProvisionWorld, name: String, pool: String) {
    create(provision_world, &name, &pool, INLINE_IGNITION);
}

#[when("I create volume \"{name}\" in pool \"{pool}\" from the ignition file")]
fn create_from_file(
    provision_world: &ProvisionWorld,
    name: String,
    pool: String,
) -> Result<(), StepError> {
    let path = provision_world
        .ignition_file
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Setup(String::from("no ignition file prepared")))?;
    let content = path
        .to_str()
        .ok_or_else(|| StepError::Setup(String::from("non-utf8 ignition path")))?
        .to_owned();
    create(provision_world, &name, &pool, &content);
    Ok(())
}

#[when("I create volume \"{name}\" in pool \"{pool}\" with content \"{content}\"")]
fn create_with_content(
    provision_world: &ProvisionWorld,
    name: String,
    pool: String,
    content: String,
) {
    create(provision_world, &name, &pool, &content);
}

#[when("I resolve the returned identifier")]
fn resolve_returned(provision_world: &ProvisionWorld) -> Result<(), StepError> {
    let id = provision_world
        .created
        .borrow()
        .as_ref()
        .map(ToString::to_string)
        .ok_or_else(|| StepError::Assertion(String::from("no identifier was returned")))?;
    resolve(provision_world, &id);
    Ok(())
}

#[when("I resolve identifier \"{id}\"")]
fn resolve_identifier(provision_world: &ProvisionWorld, id: String) {
    resolve(provision_world, &id);
}

#[then("creation succeeds")]
fn creation_succeeds(provision_world: &ProvisionWorld) -> Result<(), StepError> {
    if let Some(failure) = provision_world.failure.borrow().as_ref() {
        return Err(StepError::Assertion(format!(
            "expected success, got failure: {}",
            failure.message
        )));
    }
    let created = provision_world.created.borrow();
    let id = created
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("no identifier was returned")))?;
    if id.volume_key().is_empty() || id.token().is_empty() {
        return Err(StepError::Assertion(format!("malformed identifier {id}")));
    }
    Ok(())
}

fn stored_volume(
    provision_world: &ProvisionWorld,
    name: &str,
    pool: &str,
) -> Result<ignivol::test_support::StoredVolume, StepError> {
    provision_world
        .backend
        .volumes()
        .into_values()
        .find(|volume| volume.name == name && volume.pool == pool)
        .ok_or_else(|| StepError::Assertion(format!("volume {name} not found in pool {pool}")))
}

#[then("the volume \"{name}\" in pool \"{pool}\" holds the sample inline ignition")]
fn holds_inline(
    provision_world: &ProvisionWorld,
    name: String,
    pool: String,
) -> Result<(), StepError> {
    let volume = stored_volume(provision_world, &name, &pool)?;
    if volume.data != INLINE_IGNITION.as_bytes() {
        return Err(StepError::Assertion(format!(
            "unexpected volume content: {}",
            String::from_utf8_lossy(&volume.data)
        )));
    }
    Ok(())
}

#[then("the volume \"{name}\" in pool \"{pool}\" has capacity \"{bytes}\"")]
fn has_capacity(
    provision_world: &ProvisionWorld,
    name: String,
    pool: String,
    bytes: u64,
) -> Result<(), StepError> {
    let volume = stored_volume(provision_world, &name, &pool)?;
    if volume.capacity_bytes != bytes || volume.data.len() as u64 != bytes {
        return Err(StepError::Assertion(format!(
            "expected {bytes} bytes, got capacity {} with {} bytes uploaded",
            volume.capacity_bytes,
            volume.data.len()
        )));
    }
    Ok(())
}

#[then("the volume \"{name}\" remains in pool \"{pool}\"")]
fn volume_remains(
    provision_world: &ProvisionWorld,
    name: String,
    pool: String,
) -> Result<(), StepError> {
    stored_volume(provision_world, &name, &pool).map(drop)
}

#[then("the operation fails with a \"{kind}\" error")]
fn operation_fails(provision_world: &ProvisionWorld, kind: String) -> Result<(), StepError> {
    let expected = parse_kind(&kind)?;
    let failure = provision_world.failure.borrow();
    match failure.as_ref() {
        Some(failure) if failure.kind == expected => Ok(()),
        Some(failure) => Err(StepError::Assertion(format!(
            "expected {kind} error, got {:?}: {}",
            failure.kind, failure.message
        ))),
        None => Err(StepError::Assertion(String::from(
            "expected failure, got success",
        ))),
    }
}

#[then("the error mentions \"{snippet}\"")]
fn error_mentions(provision_world: &ProvisionWorld, snippet: String) -> Result<(), StepError> {
    let failure = provision_world.failure.borrow();
    let message = failure
        .as_ref()
        .map(|failure| failure.message.as_str())
        .unwrap_or_default();
    if message.contains(&snippet) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected error to mention '{snippet}', got: {message}"
        )))
    }
}

#[then("no backend call was made")]
fn no_backend_call(provision_world: &ProvisionWorld) -> Result<(), StepError> {
    let calls = provision_world.backend.calls();
    if calls.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected backend calls: {calls:?}")))
    }
}

#[then("the resolved volume is \"{name}\" in pool \"{pool}\"")]
fn resolved_volume(
    provision_world: &ProvisionWorld,
    name: String,
    pool: String,
) -> Result<(), StepError> {
    let resolved = provision_world.resolved.borrow();
    match resolved.as_ref() {
        Some(resolved) if resolved.name == name && resolved.pool_name == pool => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {name} in {pool}, got {other:?}"
        ))),
    }
}
