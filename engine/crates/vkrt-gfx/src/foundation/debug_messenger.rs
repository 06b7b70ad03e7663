use std::ffi::CStr;

use anyhow::Context;
use ash::vk;

/// 将 validation layer 的消息转发到 `log`
pub struct GfxDebugMsger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl GfxDebugMsger {
    pub fn new(vk_entry: &ash::Entry, instance: &ash::Instance) -> anyhow::Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(vk_entry, instance);
        let messenger = unsafe { loader.create_debug_utils_messenger(&Self::debug_utils_messenger_ci(), None) }
            .context("vkCreateDebugUtilsMessengerEXT")?;

        Ok(Self { loader, messenger })
    }

    pub fn destroy(self) {
        log::info!("destroying GfxDebugMsger");
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

/// validation layer 的消息有时是一段 json，`MainMessage` 字段里带有换行，单独输出更易读
fn format_validation_message(message_type: vk::DebugUtilsMessageTypeFlagsEXT, msg: &str) -> String {
    let Ok(serde_json::Value::Object(mut obj)) = serde_json::from_str::<serde_json::Value>(msg) else {
        return format!("[{:?}] {}", message_type, msg);
    };

    let main_msg = obj.remove("MainMessage");
    let main_msg = main_msg.as_ref().and_then(|v| v.as_str()).unwrap_or_default();
    let rest = serde_json::to_string_pretty(&obj).unwrap_or_default();
    format!("[{:?}]\n{}\n{}", message_type, rest, main_msg)
}

/// debug messenger 的回调函数
///
/// # Safety
/// 由 Vulkan loader 调用，`p_callback_data` 在回调期间有效
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let msg = unsafe {
        if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
            std::borrow::Cow::from("")
        } else {
            CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
        }
    };
    let msg = format_validation_message(message_type, msg.as_ref());

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{}", msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{}", msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::info!("{}", msg),
        _ => log::debug!("{}", msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

// 构造过程辅助函数
impl GfxDebugMsger {
    /// 用于创建 debug messenger 的结构体，也会被挂到 InstanceCreateInfo 上，用于捕获 instance 创建过程中的消息
    pub fn debug_utils_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
    }
}

/// 可以设置 debug name 的 Vulkan 对象
pub trait DebugType {
    fn debug_type_name() -> &'static str;
    fn vk_handle(&self) -> impl vk::Handle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_message_is_kept() {
        let msg = format_validation_message(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION, "plain text");
        assert!(msg.ends_with("plain text"));
    }

    #[test]
    fn test_json_main_message_is_split_out() {
        let msg = format_validation_message(
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            r#"{"MainMessage": "line1\nline2", "Id": 7}"#,
        );
        assert!(msg.ends_with("line1\nline2"));
        assert!(msg.contains("\"Id\": 7"));
    }
}
