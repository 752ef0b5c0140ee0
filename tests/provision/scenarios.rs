//! BDD scenarios for ignition volume provisioning.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisionWorld, provision_world};

#[scenario(
    path = "tests/features/provision.feature",
    name = "Create a volume from inline ignition content"
)]
fn scenario_inline_content(provision_world: ProvisionWorld) {
    drop(provision_world);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Create a volume from an ignition file"
)]
fn scenario_file_content(provision_world: ProvisionWorld) {
    drop(provision_world);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Reject content that is neither a file nor a JSON object"
)]
fn scenario_invalid_content(provision_world: ProvisionWorld) {
    drop(provision_world);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Reject an unknown pool"
)]
fn scenario_unknown_pool(provision_world: ProvisionWorld) {
    drop(provision_world);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Ride out a busy pool"
)]
fn scenario_busy_pool(provision_world: ProvisionWorld) {
    drop(provision_world);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Give up on a pool that stays busy"
)]
fn scenario_pool_stays_busy(provision_world: ProvisionWorld) {
    drop(provision_world);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Reject a created volume without a key"
)]
fn scenario_missing_key(provision_world: ProvisionWorld) {
    drop(provision_world);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Leave the volume behind when the upload fails"
)]
fn scenario_upload_failure(provision_world: ProvisionWorld) {
    drop(provision_world);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Reject a malformed identifier"
)]
fn scenario_malformed_identifier(provision_world: ProvisionWorld) {
    drop(provision_world);
}
