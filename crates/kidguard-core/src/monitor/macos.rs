use anyhow::Result;
use async_trait::async_trait;
use cocoa::base::{id, nil};
use cocoa::foundation::NSAutoreleasePool;
use objc::{class, msg_send, sel, sel_impl};
use tokio::process::Command;

use super::ForegroundAppObserver;

const FRONTMOST_BUNDLE_SCRIPT: &str = r#"
    tell application "System Events"
        return bundle identifier of first application process whose frontmost is true
    end tell
"#;

/// Reports the bundle identifier of the frontmost application
#[derive(Default)]
pub struct MacOSObserver;

impl MacOSObserver {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn frontmost_bundle_id() -> Option<String> {
        unsafe {
            let _pool = NSAutoreleasePool::new(nil);

            let workspace: id = msg_send![class!(NSWorkspace), sharedWorkspace];
            let frontmost_app: id = msg_send![workspace, frontmostApplication];
            if frontmost_app == nil {
                return None;
            }

            let bundle_id: id = msg_send![frontmost_app, bundleIdentifier];
            if bundle_id.is_null() {
                return None;
            }
            let bytes: *const u8 = msg_send![bundle_id, UTF8String];
            let len: usize = msg_send![bundle_id, lengthOfBytesUsingEncoding: 4_usize];
            let slice = std::slice::from_raw_parts(bytes, len);
            Some(String::from_utf8_lossy(slice).to_string())
        }
    }
}

#[async_trait]
impl ForegroundAppObserver for MacOSObserver {
    async fn foreground_app(&self) -> Result<Option<String>> {
        let output = Command::new("osascript")
            .arg("-e")
            .arg(FRONTMOST_BUNDLE_SCRIPT)
            .output()
            .await;

        if let Ok(output) = output {
            if output.status.success() {
                let bundle_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !bundle_id.is_empty() && bundle_id != "missing value" {
                    return Ok(Some(bundle_id));
                }
            }
        }

        // AppleScript needs automation permission; fall back to NSWorkspace
        Ok(Self::frontmost_bundle_id())
    }

    fn name(&self) -> &'static str {
        "macos"
    }
}
