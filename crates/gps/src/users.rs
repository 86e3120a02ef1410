use std::collections::HashMap;
use std::ffi::CStr;

/// Looks up the login name of `uid` in the password database.
pub fn login_name(uid: u32) -> Option<String> {
    let mut buffer = vec![0 as libc::c_char; 1024];
    loop {
        // SAFETY: passwd is plain data and all-zero is a valid bit pattern.
        let mut entry: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        // SAFETY: every pointer refers to a live local of the right size.
        let status = unsafe {
            libc::getpwuid_r(
                uid as libc::uid_t,
                &mut entry,
                buffer.as_mut_ptr(),
                buffer.len(),
                &mut result,
            )
        };

        if status == libc::ERANGE && buffer.len() < 1 << 20 {
            buffer.resize(buffer.len() * 2, 0);
            continue;
        }
        if status != 0 || result.is_null() || entry.pw_name.is_null() {
            return None;
        }
        // SAFETY: on success pw_name points into `buffer` and is NUL terminated.
        let name = unsafe { CStr::from_ptr(entry.pw_name) };
        return Some(name.to_string_lossy().into_owned());
    }
}

/// Resolves uids to login names, each uid at most once, falling back to the
/// numeric id for unknown users.
#[derive(Debug, Default)]
pub struct UserNames {
    cache: HashMap<u32, String>,
}

impl UserNames {
    pub fn resolve(&mut self, uid: u32) -> String {
        self.cache
            .entry(uid)
            .or_insert_with(|| {
                login_name(uid).unwrap_or_else(|| {
                    tracing::warn!("failed to get username for uid {uid}");
                    uid.to_string()
                })
            })
            .clone()
    }
}
