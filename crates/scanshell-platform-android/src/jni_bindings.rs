//! JNI bindings for Android
//!
//! Kotlin side: `io.scanshell.ScanCore` declares the `native*` functions
//! below, and `io.scanshell.ScanBridge` implements the preview operations
//! called back from Rust.

use std::sync::Arc;

use jni::objects::{GlobalRef, JClass, JObject, JString, JValue};
use jni::sys::{jboolean, jdouble, jint, jlong, jstring, JNI_FALSE, JNI_TRUE};
use jni::{JNIEnv, JavaVM};

use crate::core::ScanCore;
use crate::error::ScanError;
use crate::preview::PreviewBridge;

// ============================================================================
// Kotlin bridge
// ============================================================================

struct JniPreviewBridge {
    vm: JavaVM,
    bridge: GlobalRef,
}

impl JniPreviewBridge {
    fn call(&self, name: &str, sig: &str, args: &[JValue]) -> anyhow::Result<()> {
        let mut env = self.vm.attach_current_thread()?;
        let result = env.call_method(self.bridge.as_obj(), name, sig, args);
        if result.is_err() && env.exception_check()? {
            env.exception_clear()?;
        }
        result.map_err(|e| anyhow::anyhow!("ScanBridge.{name} failed: {e}"))?;
        Ok(())
    }

    fn call_with_string(&self, name: &str, value: &str) -> anyhow::Result<()> {
        let mut env = self.vm.attach_current_thread()?;
        let value = env.new_string(value)?;
        let result = env.call_method(
            self.bridge.as_obj(),
            name,
            "(Ljava/lang/String;)V",
            &[JValue::Object(value.as_ref())],
        );
        if result.is_err() && env.exception_check()? {
            env.exception_clear()?;
        }
        result.map_err(|e| anyhow::anyhow!("ScanBridge.{name} failed: {e}"))?;
        Ok(())
    }
}

impl PreviewBridge for JniPreviewBridge {
    fn create_scan_session(
        &self,
        license_key: &str,
        decode_config: i32,
        crop_ratio: f32,
        container_id: i64,
    ) -> anyhow::Result<()> {
        let mut env = self.vm.attach_current_thread()?;
        let key = env.new_string(license_key)?;
        let result = env.call_method(
            self.bridge.as_obj(),
            "createScanSession",
            "(Ljava/lang/String;IFJ)V",
            &[
                JValue::Object(key.as_ref()),
                JValue::Int(decode_config),
                JValue::Float(crop_ratio),
                JValue::Long(container_id),
            ],
        );
        if result.is_err() && env.exception_check()? {
            env.exception_clear()?;
        }
        result.map_err(|e| anyhow::anyhow!("ScanBridge.createScanSession failed: {e}"))?;
        Ok(())
    }

    fn add_to_container(&self, container_id: i64) -> anyhow::Result<()> {
        self.call("addToContainer", "(J)V", &[JValue::Long(container_id)])
    }

    fn remove_from_container(&self) -> anyhow::Result<()> {
        self.call("removeFromContainer", "()V", &[])
    }

    fn validate_license(&self, license_key: &str) -> anyhow::Result<()> {
        self.call_with_string("validateLicense", license_key)
    }

    fn start_scanning(&self) -> anyhow::Result<()> {
        self.call("startScanning", "()V", &[])
    }

    fn stop_scanning(&self) -> anyhow::Result<()> {
        self.call("stopScanning", "()V", &[])
    }

    fn enable_torch(&self, enabled: bool) -> anyhow::Result<()> {
        self.call("enableTorch", "(Z)V", &[JValue::Bool(enabled as jboolean)])
    }

    fn set_decode_config(&self, decode_config: i32) -> anyhow::Result<()> {
        self.call("setDecodeConfig", "(I)V", &[JValue::Int(decode_config)])
    }

    fn network_available(&self) -> bool {
        let available = || -> anyhow::Result<bool> {
            let mut env = self.vm.attach_current_thread()?;
            let value = env.call_method(self.bridge.as_obj(), "networkAvailable", "()Z", &[]);
            if value.is_err() && env.exception_check()? {
                env.exception_clear()?;
            }
            Ok(value?.z()?)
        };
        available().unwrap_or(false)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn core_ref<'a>(handle: jlong) -> Result<&'a ScanCore, ScanError> {
    if handle == 0 {
        return Err(ScanError::InvalidParameter("Invalid handle".to_string()));
    }
    // SAFETY: handle was produced by `nativeInit` and not yet destroyed
    Ok(unsafe { &*(handle as *const ScanCore) })
}

fn throw(env: &mut JNIEnv, e: ScanError) {
    let _ = env.throw_new("java/lang/RuntimeException", e.to_string());
}

fn to_jboolean(value: bool) -> jboolean {
    if value {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

fn unit_call(env: &mut JNIEnv, handle: jlong, f: impl FnOnce(&ScanCore) -> Result<(), ScanError>) {
    if let Err(e) = core_ref(handle).and_then(f) {
        throw(env, e);
    }
}

fn bool_call(handle: jlong, f: impl FnOnce(&ScanCore) -> bool) -> jboolean {
    to_jboolean(core_ref(handle).map(f).unwrap_or(false))
}

fn optional_string(env: &mut JNIEnv, value: Option<String>) -> jstring {
    match value {
        Some(value) => env
            .new_string(value)
            .map(|s| s.into_raw())
            .unwrap_or(std::ptr::null_mut()),
        None => std::ptr::null_mut(),
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Create the scanner core. Returns a handle, or 0 after throwing.
#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeInit(
    mut env: JNIEnv,
    _class: JClass,
    bridge: JObject,
    config_toml: JString,
    files_dir: JString,
) -> jlong {
    let result = || -> Result<jlong, ScanError> {
        let config: String = env.get_string(&config_toml)?.into();
        let files_dir: String = env.get_string(&files_dir)?.into();
        let bridge = JniPreviewBridge {
            vm: env.get_java_vm()?,
            bridge: env.new_global_ref(bridge)?,
        };
        let core = ScanCore::from_toml(Arc::new(bridge), &config, Some(&files_dir))?;
        Ok(Box::into_raw(Box::new(core)) as jlong)
    }();

    match result {
        Ok(handle) => handle,
        Err(e) => {
            throw(&mut env, e);
            0
        }
    }
}

/// Shut down and free the core.
#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeDestroy(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    if handle != 0 {
        // SAFETY: handle was produced by `nativeInit`; Kotlin clears it after this call
        let core = unsafe { Box::from_raw(handle as *mut ScanCore) };
        core.shutdown();
    }
}

#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeReportLayout(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    container: jlong,
    width: jdouble,
    height: jdouble,
) {
    unit_call(&mut env, handle, |core| core.report_layout(container, width, height));
}

#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeForgetContainer(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    container: jlong,
) {
    unit_call(&mut env, handle, |core| core.forget_container(container));
}

/// Blocks until initialization settles - call from a background thread.
#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeInitialize(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
    container: jlong,
) -> jboolean {
    bool_call(handle, |core| core.initialize(container))
}

/// Blocks until initialization settles - call from a background thread.
#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeRetry(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
    container: jlong,
) -> jboolean {
    bool_call(handle, |core| core.retry(container))
}

#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeClearSavedLicense(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    unit_call(&mut env, handle, ScanCore::clear_saved_license);
}

// ============================================================================
// Camera
// ============================================================================

/// Lease the camera. Returns the lease id, or -1 after throwing.
#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeAcquireCamera(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    container: jlong,
) -> jlong {
    match core_ref(handle).and_then(|core| core.acquire_camera(container)) {
        Ok(id) => id as jlong,
        Err(e) => {
            throw(&mut env, e);
            -1
        }
    }
}

#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeReturnCamera(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    unit_call(&mut env, handle, ScanCore::return_camera);
}

#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeStartCamera(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    unit_call(&mut env, handle, ScanCore::start_camera);
}

#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeStopCamera(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    unit_call(&mut env, handle, ScanCore::stop_camera);
}

#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeSetTorch(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    enabled: jboolean,
) {
    unit_call(&mut env, handle, |core| core.set_torch(enabled != JNI_FALSE));
}

#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeSetScannerMode(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    mode: jint,
) {
    unit_call(&mut env, handle, |core| core.set_scanner_mode(mode));
}

// ============================================================================
// Queries
// ============================================================================

#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeIsFullyInitialized(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jboolean {
    bool_call(handle, ScanCore::is_fully_initialized)
}

#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeIsFirstTimeUse(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jboolean {
    bool_call(handle, ScanCore::is_first_time_use)
}

#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeIsValidationInProgress(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jboolean {
    bool_call(handle, ScanCore::is_validation_in_progress)
}

#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeLastError(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jstring {
    let error = core_ref(handle).ok().and_then(ScanCore::last_error);
    optional_string(&mut env, error)
}

/// Next event as JSON, or null.
#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativePollEvent(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jstring {
    match core_ref(handle).and_then(ScanCore::poll_event_json) {
        Ok(event) => optional_string(&mut env, event),
        Err(e) => {
            throw(&mut env, e);
            std::ptr::null_mut()
        }
    }
}

// ============================================================================
// SDK callbacks
// ============================================================================

#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeOnLicenseResult(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    success: jboolean,
    message: JString,
) {
    let result = || -> Result<(), ScanError> {
        let core = core_ref(handle)?;
        let message: String = env.get_string(&message)?.into();
        core.on_license_result(success != JNI_FALSE, &message);
        Ok(())
    }();
    if let Err(e) = result {
        throw(&mut env, e);
    }
}

#[no_mangle]
pub extern "system" fn Java_io_scanshell_ScanCore_nativeOnScanDecoded(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    text: JString,
) {
    let result = || -> Result<(), ScanError> {
        let core = core_ref(handle)?;
        let text: String = env.get_string(&text)?.into();
        core.on_scan_decoded(&text);
        Ok(())
    }();
    if let Err(e) = result {
        throw(&mut env, e);
    }
}
