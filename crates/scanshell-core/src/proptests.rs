//! Property-based tests for scanshell-core
//!
//! These tests verify correctness properties using proptest.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use crate::camera::CameraResourceHandle;
    use crate::config::ScanConfig;
    use crate::errors::SessionError;
    use crate::harness::SimulatedCamera;
    use crate::platform::Platform;
    use crate::types::{LicenseRecord, ScannerMode};

    #[derive(Clone, Debug)]
    enum LeaseOp {
        Acquire,
        Return,
    }

    fn lease_op() -> impl Strategy<Value = LeaseOp> {
        prop_oneof![Just(LeaseOp::Acquire), Just(LeaseOp::Return)]
    }

    fn scanner_mode() -> impl Strategy<Value = ScannerMode> {
        prop::sample::select(ScannerMode::ALL.to_vec())
    }

    // Property: Lease Exclusivity
    //
    // For any sequence of acquire/return operations, an acquire succeeds iff
    // no lease is outstanding, and a returned lease frees the camera.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_at_most_one_lease(ops in prop::collection::vec(lease_op(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let sim = SimulatedCamera::shared(Platform::Android);
                let handle = CameraResourceHandle::new(sim, ScannerMode::Any);
                let mut held = None;

                for op in ops {
                    match op {
                        LeaseOp::Acquire => {
                            let result = handle.lease();
                            if held.is_some() {
                                prop_assert!(matches!(result, Err(SessionError::ResourceBusy)));
                            } else {
                                held = Some(result.unwrap());
                            }
                        }
                        LeaseOp::Return => {
                            if let Some(lease) = held.take() {
                                handle.return_lease(lease).await.unwrap();
                            }
                        }
                    }
                    prop_assert_eq!(handle.is_leased(), held.is_some());
                }
                Ok(())
            })?;
        }
    }

    // Property: Scanner Mode Codes
    //
    // Codes handed to the native SDK decode back to the same mode, and any
    // unknown code decodes to the permissive default.
    proptest! {
        #[test]
        fn test_mode_code_inverse(mode in scanner_mode()) {
            prop_assert_eq!(ScannerMode::from_code(mode.code()), mode);
        }

        #[test]
        fn test_unknown_codes_default_to_any(code in any::<i32>()) {
            prop_assume!(!(0..=4).contains(&code));
            prop_assert_eq!(ScannerMode::from_code(code), ScannerMode::Any);
        }

        #[test]
        fn test_selection_names_containing_qr(prefix in "[a-z ]{0,8}", suffix in "[a-z ]{0,8}") {
            let name = format!("{prefix}QR{suffix}");
            prop_assert_eq!(ScannerMode::from_selection_name(&name), ScannerMode::QrCode);
        }

        #[test]
        fn test_selection_names_without_keywords(name in "[c-p ]{0,16}") {
            prop_assume!(!name.contains("any"));
            prop_assert_eq!(ScannerMode::from_selection_name(&name), ScannerMode::Any);
        }
    }

    // Property: Silent Path Eligibility
    //
    // A saved record allows the silent path only for the identifier it was
    // validated with.
    proptest! {
        #[test]
        fn test_record_matches_only_its_identifier(
            saved in "[A-Za-z0-9-]{1,24}",
            current in "[A-Za-z0-9-]{1,24}",
        ) {
            let record = LicenseRecord::validated(saved.clone());
            prop_assert_eq!(record.matches(&current), saved == current);
        }
    }

    // Property: Crop Ratio Validation
    proptest! {
        #[test]
        fn test_crop_ratio_bounds(ratio in -2.0f32..2.0f32) {
            let mut config = ScanConfig::default();
            config.license.android_key = "key".to_string();
            config.scanner.crop_ratio = ratio;
            prop_assert_eq!(config.validate().is_ok(), ratio > 0.0 && ratio <= 1.0);
        }
    }

    #[test]
    fn test_lease_ids_are_unique() {
        let sim: Arc<SimulatedCamera> = SimulatedCamera::shared(Platform::Ios);
        let handle = CameraResourceHandle::new(sim, ScannerMode::Any);
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        let ids: Vec<u64> = (0..5)
            .map(|_| {
                let lease = handle.lease().unwrap();
                let id = lease.id();
                rt.block_on(handle.return_lease(lease)).unwrap();
                id
            })
            .collect();
        let distinct: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), ids.len());
    }
}
