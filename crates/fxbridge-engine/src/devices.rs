use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default_input: bool,
    pub is_default_output: bool,
    /// Channels of the default input config, if the device can record.
    pub input_channels: Option<u16>,
    /// Channels of the default output config, if the device can play.
    pub output_channels: Option<u16>,
}

impl DeviceInfo {
    fn from_device(dev: &cpal::Device, default_in: Option<&str>, default_out: Option<&str>) -> Self {
        let name = dev.name().unwrap_or_else(|_| "<unknown>".to_string());
        Self {
            is_default_input: default_in == Some(name.as_str()),
            is_default_output: default_out == Some(name.as_str()),
            input_channels: dev.default_input_config().ok().map(|c| c.channels()),
            output_channels: dev.default_output_config().ok().map(|c| c.channels()),
            name,
        }
    }
}

pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_in = host.default_input_device().and_then(|d| d.name().ok());
    let default_out = host.default_output_device().and_then(|d| d.name().ok());

    Ok(host
        .devices()?
        .map(|dev| DeviceInfo::from_device(&dev, default_in.as_deref(), default_out.as_deref()))
        .collect())
}

pub fn print_devices() -> Result<()> {
    let list = list_devices()?;
    if list.is_empty() {
        println!("(no devices found)");
        return Ok(());
    }
    for (i, d) in list.iter().enumerate() {
        let marks = match (d.is_default_input, d.is_default_output) {
            (true, true) => "[*I *O] ",
            (true, false) => "[*I] ",
            (false, true) => "[*O] ",
            (false, false) => "",
        };
        let fmt_ch = |ch: Option<u16>| ch.map_or_else(|| "-".to_string(), |c| c.to_string());
        println!(
            "{:>2}  {marks}{}  (in: {}, out: {})",
            i,
            d.name,
            fmt_ch(d.input_channels),
            fmt_ch(d.output_channels)
        );
    }
    Ok(())
}
