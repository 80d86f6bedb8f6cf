//! [`RemoteApi`] backed by VoicemeeterRemote64.dll

use async_trait::async_trait;
use libloading::{Library, Symbol};
use parking_lot::Mutex;
use std::ffi::{c_char, CStr, CString};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{install_dirs, RemoteError, RemoteApi, DLL_NAME};

type LoginFn = unsafe extern "system" fn() -> i32;
type LogoutFn = unsafe extern "system" fn() -> i32;
type IsDirtyFn = unsafe extern "system" fn() -> i32;
type GetFloatFn = unsafe extern "system" fn(*const c_char, *mut f32) -> i32;
type SetFloatFn = unsafe extern "system" fn(*const c_char, f32) -> i32;
type GetStringFn = unsafe extern "system" fn(*const c_char, *mut c_char) -> i32;
type SetStringFn = unsafe extern "system" fn(*const c_char, *const c_char) -> i32;

/// Size of the buffer the DLL fills for string parameters
const STRING_BUFFER_LEN: usize = 512;

/// Return codes meaning the engine went away
const CODE_ERROR: i32 = -1;
const CODE_NO_SERVER: i32 = -2;

struct Inner {
    library: Option<Library>,
    connected: bool,
}

pub struct DllRemote {
    search_dirs: Vec<PathBuf>,
    inner: Mutex<Inner>,
}

impl DllRemote {
    pub fn new(override_dir: Option<&Path>) -> Self {
        Self {
            search_dirs: install_dirs(override_dir),
            inner: Mutex::new(Inner {
                library: None,
                connected: false,
            }),
        }
    }

    /// Locate the DLL in the install directories
    pub fn find_library(&self) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .map(|dir| dir.join(DLL_NAME))
            .find(|path| path.exists())
    }

    fn load_library(&self, inner: &mut Inner) -> Result<(), RemoteError> {
        if inner.library.is_some() {
            return Ok(());
        }
        let path = self.find_library().ok_or_else(|| {
            let searched: Vec<String> = self
                .search_dirs
                .iter()
                .map(|d| d.display().to_string())
                .collect();
            RemoteError::LibraryNotFound(searched.join(", "))
        })?;
        // SAFETY: the VoiceMeeter remote DLL has no initialisation side effects
        // beyond registering its exports.
        let library = unsafe { Library::new(&path) }
            .map_err(|e| RemoteError::LibraryLoad(e.to_string()))?;
        info!("Loaded {}", path.display());
        inner.library = Some(library);
        Ok(())
    }

    /// Run `f` with the loaded library while connected. A "no server" result
    /// drops the connection so the next login starts fresh.
    fn with_library<T>(
        &self,
        f: impl FnOnce(&Library) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let mut inner = self.inner.lock();
        if !inner.connected {
            return Err(RemoteError::NotConnected);
        }
        let library = inner.library.as_ref().ok_or(RemoteError::NotConnected)?;
        let result = f(library);
        if let Err(RemoteError::Call { code, .. }) = &result {
            if matches!(*code, CODE_ERROR | CODE_NO_SERVER) {
                debug!("Remote call lost the engine (code {}), marking disconnected", code);
                inner.connected = false;
            }
        }
        result
    }
}

fn symbol<'lib, T>(library: &'lib Library, name: &[u8]) -> Result<Symbol<'lib, T>, RemoteError> {
    // SAFETY: every symbol is looked up with the exact signature the
    // VoiceMeeter remote API documents for it.
    unsafe { library.get(name) }.map_err(|e| RemoteError::LibraryLoad(e.to_string()))
}

fn c_string(value: &str) -> Result<CString, RemoteError> {
    CString::new(value).map_err(|_| RemoteError::InvalidArgument(value.to_string()))
}

fn check(call: &'static str, param: &str, code: i32) -> Result<(), RemoteError> {
    if code == 0 {
        Ok(())
    } else {
        Err(RemoteError::Call {
            call,
            param: param.to_string(),
            code,
        })
    }
}

/// Refresh the DLL's parameter cache before a read
fn refresh(library: &Library) -> Result<(), RemoteError> {
    let is_dirty: Symbol<IsDirtyFn> = symbol(library, b"VBVMR_IsParametersDirty\0")?;
    // SAFETY: no arguments
    let code = unsafe { is_dirty() };
    if code < 0 {
        return Err(RemoteError::Call {
            call: "IsParametersDirty",
            param: String::new(),
            code,
        });
    }
    Ok(())
}

#[async_trait]
impl RemoteApi for DllRemote {
    async fn login(&self) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        if inner.connected {
            return Ok(());
        }
        self.load_library(&mut inner)?;
        let code = {
            let library = inner.library.as_ref().ok_or(RemoteError::NotConnected)?;
            let login: Symbol<LoginFn> = symbol(library, b"VBVMR_Login\0")?;
            // SAFETY: no arguments
            unsafe { login() }
        };
        // 1 means logged in while the application itself is not running yet
        if code == 0 || code == 1 {
            debug!("Remote login returned {}", code);
            inner.connected = true;
            Ok(())
        } else {
            Err(RemoteError::LoginRefused(code))
        }
    }

    async fn logout(&self) {
        let mut inner = self.inner.lock();
        if !inner.connected {
            return;
        }
        inner.connected = false;
        if let Some(library) = inner.library.as_ref() {
            match symbol::<LogoutFn>(library, b"VBVMR_Logout\0") {
                // SAFETY: no arguments
                Ok(logout) => {
                    unsafe { logout() };
                }
                Err(e) => warn!("Logout unavailable: {}", e),
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    async fn get_float(&self, param: &str) -> Result<f32, RemoteError> {
        let name = c_string(param)?;
        self.with_library(|library| {
            refresh(library)?;
            let get: Symbol<GetFloatFn> = symbol(library, b"VBVMR_GetParameterFloat\0")?;
            let mut value = 0.0f32;
            // SAFETY: `name` is NUL-terminated and `value` outlives the call
            let code = unsafe { get(name.as_ptr(), &mut value) };
            check("GetParameterFloat", param, code)?;
            Ok(value)
        })
    }

    async fn set_float(&self, param: &str, value: f32) -> Result<(), RemoteError> {
        let name = c_string(param)?;
        self.with_library(|library| {
            let set: Symbol<SetFloatFn> = symbol(library, b"VBVMR_SetParameterFloat\0")?;
            // SAFETY: `name` is NUL-terminated
            let code = unsafe { set(name.as_ptr(), value) };
            check("SetParameterFloat", param, code)
        })
    }

    async fn get_string(&self, param: &str) -> Result<String, RemoteError> {
        let name = c_string(param)?;
        self.with_library(|library| {
            refresh(library)?;
            let get: Symbol<GetStringFn> = symbol(library, b"VBVMR_GetParameterStringA\0")?;
            let mut buffer = [0u8; STRING_BUFFER_LEN];
            // SAFETY: the DLL writes at most 512 bytes including the terminator
            let code = unsafe { get(name.as_ptr(), buffer.as_mut_ptr().cast::<c_char>()) };
            check("GetParameterStringA", param, code)?;
            let value = CStr::from_bytes_until_nul(&buffer)
                .map(|s| s.to_string_lossy().trim().to_string())
                .unwrap_or_default();
            Ok(value)
        })
    }

    async fn set_string(&self, param: &str, value: &str) -> Result<(), RemoteError> {
        let name = c_string(param)?;
        let text = c_string(value)?;
        self.with_library(|library| {
            let set: Symbol<SetStringFn> = symbol(library, b"VBVMR_SetParameterStringA\0")?;
            // SAFETY: both strings are NUL-terminated
            let code = unsafe { set(name.as_ptr(), text.as_ptr()) };
            check("SetParameterStringA", param, code)
        })
    }
}
