mod common;

// std
use std::sync::Arc;
// crates.io
use time::Duration;
// self
use common::*;
use module_gate::{
	issuer::{CredentialKind, IssuedToken, Minted, TokenRejection, Validation},
	store::MemoryStore,
};

async fn seeded() -> Arc<MemoryStore> {
	let store = Arc::new(MemoryStore::default());

	for id in ["librespeed", "metube"] {
		seed_module(&store, id, true).await;
		seed_grant(&store, grant("u-a", id).max_usage(50).build()).await;
	}

	store
}

fn issued(minted: Minted) -> IssuedToken {
	match minted {
		Minted::Issued(issued) => issued,
		Minted::Denied(verdict) => panic!("Mint should be authorized, got {verdict:?}."),
	}
}

#[tokio::test]
async fn scenario_b_single_use_and_expiry() {
	let store = seeded().await;
	let issuer = issuer(&store);
	let request = request("u-a", "librespeed");
	let first = issued(
		issuer
			.mint_at(&request, CredentialKind::Opaque, Duration::minutes(5), t0())
			.await
			.expect("Mint should not fail."),
	);
	let token = first.token.expose();
	let valid = issuer
		.validate_at(token, &module("librespeed"), t0() + Duration::minutes(4))
		.await
		.expect("Validation should not fail.");

	assert!(valid.is_valid());

	let replay = issuer
		.validate_at(token, &module("librespeed"), t0() + Duration::minutes(4))
		.await
		.expect("Validation should not fail.");

	assert_eq!(replay, Validation::Rejected(TokenRejection::AlreadyUsed));
	assert_eq!(replay.reason(), Some("invalid or expired"));

	let second = issued(
		issuer
			.mint_at(&request, CredentialKind::Opaque, Duration::minutes(5), t0())
			.await
			.expect("Mint should not fail."),
	);
	let late = issuer
		.validate_at(second.token.expose(), &module("librespeed"), t0() + Duration::minutes(6))
		.await
		.expect("Validation should not fail.");

	assert_eq!(late, Validation::Rejected(TokenRejection::Expired));
}

#[tokio::test]
async fn tokens_never_validate_for_another_module() {
	let store = seeded().await;
	let issuer = issuer(&store);

	for kind in [CredentialKind::Opaque, CredentialKind::Jwt] {
		let minted = issued(
			issuer
				.mint_at(&request("u-a", "librespeed"), kind, Duration::minutes(5), t0())
				.await
				.expect("Mint should not fail."),
		);
		let crossed = issuer
			.validate_at(minted.token.expose(), &module("metube"), t0())
			.await
			.expect("Validation should not fail.");

		assert_eq!(crossed, Validation::Rejected(TokenRejection::ModuleMismatch), "{kind}");

		let Validation::Valid(validated) = issuer
			.validate_at(minted.token.expose(), &module("librespeed"), t0())
			.await
			.expect("Validation should not fail.")
		else {
			panic!("A mismatched attempt must not burn the {kind} token.");
		};

		assert_eq!(validated.user.user_id, user("u-a").user_id);
		assert_eq!(validated.kind, kind);
	}
}

#[tokio::test]
async fn denied_requests_never_mint() {
	let store = seeded().await;
	let issuer = issuer(&store);
	let minted = issuer
		.mint_at(&request("u-nobody", "librespeed"), CredentialKind::Opaque, Duration::minutes(5), t0())
		.await
		.expect("Mint should not fail.");

	assert!(matches!(minted, Minted::Denied(verdict) if verdict.code() == Some("no_access")));
	assert_eq!(issuer.sweep_expired_at(t0() + Duration::days(1)).await.expect("Sweep should run."), 0);
}

#[tokio::test]
async fn sweeping_removes_only_expired_tokens() {
	let store = seeded().await;
	let issuer = issuer(&store);
	let request = request("u-a", "librespeed");

	for lifetime in [Duration::minutes(5), Duration::minutes(5), Duration::hours(2)] {
		issuer
			.mint_at(&request, CredentialKind::Opaque, lifetime, t0())
			.await
			.expect("Mint should not fail.");
	}

	let later = t0() + Duration::minutes(30);

	assert_eq!(issuer.sweep_expired_at(later).await.expect("Sweep should run."), 2);
	assert_eq!(issuer.sweep_expired_at(later).await.expect("Sweep should run."), 0);
}
