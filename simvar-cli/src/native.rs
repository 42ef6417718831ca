//! Native session bound to the simulator's client library
//!
//! The library is located at runtime and its entry points are bound with
//! libloading, so the binary builds and runs (in `--simulate` mode) on
//! machines without a simulator installed.

use libloading::Library;
use simvar_sync::{DataType, DefineId, RequestId, Session, SessionError};
use std::ffi::CString;
use std::os::raw::{c_char, c_void};
use std::path::{Path, PathBuf};
use std::ptr;

/// File name of the client library
pub const LIBRARY_NAME: &str = "SimConnect.dll";

/// HRESULT the dispatch call returns when no record is waiting
const E_FAIL: i32 = 0x8000_4005_u32 as i32;

/// Datum id for definitions that do not tag their fields
const UNUSED_DATUM_ID: u32 = 0xFFFF_FFFF;

/// Object type "user aircraft" for by-type requests
const SIMOBJECT_TYPE_USER: u32 = 0;

/// Object id of the user aircraft for by-object writes
const OBJECT_ID_USER: u32 = 0;

type Handle = *mut c_void;
type HResult = i32;

type OpenFn = unsafe extern "system" fn(*mut Handle, *const c_char, *mut c_void, u32, Handle, u32) -> HResult;
type CloseFn = unsafe extern "system" fn(Handle) -> HResult;
type AddToDataDefinitionFn =
    unsafe extern "system" fn(Handle, u32, *const c_char, *const c_char, u32, f32, u32) -> HResult;
type RequestDataOnSimObjectTypeFn = unsafe extern "system" fn(Handle, u32, u32, u32, u32) -> HResult;
type SetDataOnSimObjectFn =
    unsafe extern "system" fn(Handle, u32, u32, u32, u32, u32, *const c_void) -> HResult;
type GetNextDispatchFn = unsafe extern "system" fn(Handle, *mut *mut u8, *mut u32) -> HResult;

struct EntryPoints {
    open: OpenFn,
    close: CloseFn,
    add_to_data_definition: AddToDataDefinitionFn,
    request_data_on_sim_object_type: RequestDataOnSimObjectTypeFn,
    set_data_on_sim_object: SetDataOnSimObjectFn,
    get_next_dispatch: GetNextDispatchFn,
}

/// Session backed by the simulator client library
pub struct NativeSession {
    entry: EntryPoints,
    handle: Handle,
    path: PathBuf,
    _library: Library,
}

// The handle is only ever used from the task that owns the session
unsafe impl Send for NativeSession {}

impl NativeSession {
    /// Locate and load the client library
    ///
    /// Search order: `extra_dir` if given, the executable's directory, the
    /// current directory.
    pub fn load(extra_dir: Option<&Path>) -> Result<Self, SessionError> {
        let path = locate_library(extra_dir)?;
        log::info!("Loading client library from {}", path.display());

        // Loading runs the library's initialisers; nothing else is assumed
        let library = unsafe { Library::new(&path) }
            .map_err(|e| SessionError::LibraryLoad(format!("{}: {}", path.display(), e)))?;

        let entry = unsafe {
            EntryPoints {
                open: symbol(&library, "SimConnect_Open")?,
                close: symbol(&library, "SimConnect_Close")?,
                add_to_data_definition: symbol(&library, "SimConnect_AddToDataDefinition")?,
                request_data_on_sim_object_type: symbol(
                    &library,
                    "SimConnect_RequestDataOnSimObjectType",
                )?,
                set_data_on_sim_object: symbol(&library, "SimConnect_SetDataOnSimObject")?,
                get_next_dispatch: symbol(&library, "SimConnect_GetNextDispatch")?,
            }
        };

        Ok(Self {
            entry,
            handle: ptr::null_mut(),
            path,
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.handle.is_null() {
            Err(SessionError::NotOpen)
        } else {
            Ok(())
        }
    }
}

impl Drop for NativeSession {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            if let Err(e) = self.close() {
                log::warn!("Closing session on drop failed: {}", e);
            }
        }
    }
}

impl Session for NativeSession {
    fn open(&mut self, name: &str) -> Result<(), SessionError> {
        let name = c_string("SimConnect_Open", name)?;
        let mut handle: Handle = ptr::null_mut();
        let hr = unsafe {
            (self.entry.open)(&mut handle, name.as_ptr(), ptr::null_mut(), 0, ptr::null_mut(), 0)
        };
        check("SimConnect_Open", hr)?;
        self.handle = handle;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        let hr = unsafe { (self.entry.close)(self.handle) };
        self.handle = ptr::null_mut();
        check("SimConnect_Close", hr)
    }

    fn register_variable(
        &mut self,
        define_id: DefineId,
        name: &str,
        unit: &str,
        data_type: DataType,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        let name = c_string("SimConnect_AddToDataDefinition", name)?;
        let unit = if unit.is_empty() {
            None
        } else {
            Some(c_string("SimConnect_AddToDataDefinition", unit)?)
        };
        let unit_ptr = unit.as_ref().map_or(ptr::null(), |u| u.as_ptr());

        let hr = unsafe {
            (self.entry.add_to_data_definition)(
                self.handle,
                define_id,
                name.as_ptr(),
                unit_ptr,
                data_type.as_raw(),
                0.0,
                UNUSED_DATUM_ID,
            )
        };
        check("SimConnect_AddToDataDefinition", hr)
    }

    fn request_variable(&mut self, request_id: RequestId, define_id: DefineId) -> Result<(), SessionError> {
        self.ensure_open()?;
        let hr = unsafe {
            (self.entry.request_data_on_sim_object_type)(
                self.handle,
                request_id,
                define_id,
                0,
                SIMOBJECT_TYPE_USER,
            )
        };
        check("SimConnect_RequestDataOnSimObjectType", hr)
    }

    fn set_variable(&mut self, define_id: DefineId, payload: &[u8]) -> Result<(), SessionError> {
        self.ensure_open()?;
        let unit_size = payload_size("SimConnect_SetDataOnSimObject", payload)?;

        // Flags 0 and array count 0: one untagged datum
        let hr = unsafe {
            (self.entry.set_data_on_sim_object)(
                self.handle,
                define_id,
                OBJECT_ID_USER,
                0,
                0,
                unit_size,
                payload.as_ptr().cast(),
            )
        };
        check("SimConnect_SetDataOnSimObject", hr)
    }

    fn poll_next(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        self.ensure_open()?;
        let mut data: *mut u8 = ptr::null_mut();
        let mut len: u32 = 0;
        let hr = unsafe { (self.entry.get_next_dispatch)(self.handle, &mut data, &mut len) };

        if hr == E_FAIL {
            return Ok(None);
        }
        check("SimConnect_GetNextDispatch", hr)?;
        if data.is_null() || len == 0 {
            return Ok(None);
        }

        // The buffer belongs to the library and is only valid until the next call
        let record = unsafe { std::slice::from_raw_parts(data, len as usize) }.to_vec();
        Ok(Some(record))
    }
}

/// Directories searched for the client library, in order
pub fn search_paths(extra_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = extra_dir {
        paths.push(dir.to_path_buf());
    }
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        paths.push(dir);
    }
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd);
    }
    paths
}

fn locate_library(extra_dir: Option<&Path>) -> Result<PathBuf, SessionError> {
    let paths = search_paths(extra_dir);
    paths
        .iter()
        .map(|dir| dir.join(LIBRARY_NAME))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            let searched: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
            SessionError::LibraryNotFound(format!("{} not in [{}]", LIBRARY_NAME, searched.join(", ")))
        })
}

unsafe fn symbol<T: Copy>(library: &Library, name: &str) -> Result<T, SessionError> {
    let symbol = library
        .get::<T>(name.as_bytes())
        .map_err(|e| SessionError::MissingSymbol(format!("{}: {}", name, e)))?;
    Ok(*symbol)
}

fn c_string(call: &'static str, value: &str) -> Result<CString, SessionError> {
    CString::new(value).map_err(|e| SessionError::InvalidArgument {
        call,
        reason: e.to_string(),
    })
}

fn payload_size(call: &'static str, payload: &[u8]) -> Result<u32, SessionError> {
    if payload.is_empty() {
        return Err(SessionError::InvalidArgument {
            call,
            reason: "empty payload".to_string(),
        });
    }
    u32::try_from(payload.len()).map_err(|_| SessionError::InvalidArgument {
        call,
        reason: format!("payload of {} bytes is too large", payload.len()),
    })
}

fn check(call: &'static str, hr: HResult) -> Result<(), SessionError> {
    if hr < 0 {
        Err(SessionError::CallFailed {
            call,
            code: hr as u32,
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_paths_start_with_extra_dir() {
        let extra = Path::new("/opt/msfs/sdk");
        let paths = search_paths(Some(extra));
        assert_eq!(paths[0], extra);
        assert!(paths.len() >= 2);
    }

    #[test]
    fn test_missing_library_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        match locate_library(Some(dir.path())) {
            Ok(path) => assert!(!path.starts_with(dir.path())),
            Err(e) => assert!(matches!(e, SessionError::LibraryNotFound(_))),
        }
    }

    #[test]
    fn test_library_found_in_extra_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LIBRARY_NAME), b"").unwrap();
        assert_eq!(locate_library(Some(dir.path())).unwrap(), dir.path().join(LIBRARY_NAME));
    }

    #[test]
    fn test_hresult_check() {
        assert!(check("SimConnect_Close", 0).is_ok());
        assert_eq!(
            check("SimConnect_Close", E_FAIL),
            Err(SessionError::CallFailed {
                call: "SimConnect_Close",
                code: 0x8000_4005
            })
        );
    }

    #[test]
    fn test_payload_size() {
        assert_eq!(payload_size("SimConnect_SetDataOnSimObject", &[0; 8]), Ok(8));
        assert!(matches!(
            payload_size("SimConnect_SetDataOnSimObject", &[]),
            Err(SessionError::InvalidArgument { .. })
        ));
    }
}
