use serde::Serialize;

/**
Device telemetry submitted once at registration.

Hosts with access to richer platform APIs should fill these in through
[`crate::Setup::device_info`]; [`DeviceInfo::detect`] only knows what the
standard library can see.
*/
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceInfo {
    pub operating_system: Option<String>,
    pub processor_type: Option<String>,
    pub processor_count: Option<u32>,
    pub system_memory_size: Option<u64>,
    pub graphics_device_name: Option<String>,
    pub graphics_device_vendor: Option<String>,
    pub graphics_device_version: Option<String>,
    pub system_language: Option<String>,
}

impl DeviceInfo {
    pub fn detect() -> Self {
        DeviceInfo {
            operating_system: Some(format!(
                "{} {}",
                std::env::consts::OS,
                std::env::consts::ARCH
            )),
            processor_count: std::thread::available_parallelism()
                .ok()
                .map(|count| count.get() as u32),
            system_language: std::env::var("LANG").ok(),
            ..Default::default()
        }
    }

    /**
    The telemetry as submission fields, each key wrapped by `field_name`.
    */
    pub(crate) fn fields(
        &self,
        mut field_name: impl FnMut(&str) -> String,
    ) -> Vec<(String, String)> {
        let mut fields = Vec::new();

        let mut push = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                fields.push((field_name(key), value));
            }
        };

        push("operating_system", self.operating_system.clone());
        push("processor_type", self.processor_type.clone());
        push(
            "processor_count",
            self.processor_count.map(|v| v.to_string()),
        );
        push(
            "system_memory_size",
            self.system_memory_size.map(|v| v.to_string()),
        );
        push("graphics_device_name", self.graphics_device_name.clone());
        push(
            "graphics_device_vendor",
            self.graphics_device_vendor.clone(),
        );
        push(
            "graphics_device_version",
            self.graphics_device_version.clone(),
        );
        push("system_language", self.system_language.clone());

        fields
    }
}
