use anyhow::Context;
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// Finds the input device called `device_name`, or the host's default input device.
pub fn get_or_default_input(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());

    let Some(target) = device_name else {
        return host
            .default_input_device()
            .context("No default input device");
    };
    host.input_devices()
        .context("Failed to enumerate input devices")?
        .find(|device| device.name().is_ok_and(|name| name == target))
        .with_context(|| format!("No input device named '{target}'"))
}

/// Finds the output device called `device_name`, or the host's default output device.
pub fn get_or_default_output(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();

    let Some(target) = device_name else {
        return host
            .default_output_device()
            .context("No default output device");
    };
    host.output_devices()
        .context("Failed to enumerate output devices")?
        .find(|device| device.name().is_ok_and(|name| name == target))
        .with_context(|| format!("No output device named '{target}'"))
}

/// One line per input device with its default channel count and sample rate.
pub fn get_available_inputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut device_names = Vec::new();
    for device in host.input_devices()? {
        let name = device.name()?;
        let config = device.default_input_config()?;
        device_names.push(describe(&name, config.channels(), config.sample_rate().0, default_name.as_deref()));
    }
    Ok(device_names.join("\n"))
}

pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut device_names = Vec::new();
    for device in host.output_devices()? {
        let name = device.name()?;
        let config = device.default_output_config()?;
        device_names.push(describe(&name, config.channels(), config.sample_rate().0, default_name.as_deref()));
    }
    Ok(device_names.join("\n"))
}

fn describe(name: &str, channels: u16, sample_rate: u32, default_name: Option<&str>) -> String {
    let mut line = format!(" * {name}({channels}ch, {sample_rate}hz)");
    if default_name == Some(name) {
        line.push_str(" [default]");
    }
    line
}
