//! Text rendering of decoded frames for the command-line tools.

use crate::data::{ApplicationData, Data, GeneralSystemState, LinearVelocity, MeasurementData};
use std::fmt::Write;

/// Format milliseconds since midnight as HH:MM:SS.mmm.
pub fn format_time_of_day(ms: u32) -> String {
    let ms = ms % 86_400_000;
    let h = ms / 3_600_000;
    let m = (ms % 3_600_000) / 60_000;
    let s = (ms % 60_000) / 1000;
    format!("{:02}:{:02}:{:02}.{:03}", h, m, s, ms % 1000)
}

/// Flags as a string of `1`/`0`, first flag leftmost.
pub fn format_flags(flags: &[bool]) -> String {
    flags.iter().map(|&f| if f { '1' } else { '0' }).collect()
}

pub fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// One line per frame: scan number, present sections and beam count.
pub fn frame_summary_line(data: &Data) -> String {
    let h = &data.header;
    let mut sections = Vec::new();
    if data.general_system_state.is_some() {
        sections.push("gss");
    }
    if data.derived_values.is_some() {
        sections.push("derived");
    }
    if data.measurement_data.is_some() {
        sections.push("meas");
    }
    if data.intrusion_data.is_some() {
        sections.push("intr");
    }
    if data.application_data.is_some() {
        sections.push("app");
    }
    let beams = data
        .measurement_data
        .as_ref()
        .map_or(0, MeasurementData::number_of_beams);
    let mut line = format!(
        "scan {} seq {} ch {} {} [{}] beams={}",
        h.scan_number,
        h.sequence_number,
        h.channel_number,
        format_time_of_day(h.timestamp_time),
        sections.join(","),
        beams
    );
    if !data.invalid_sections.is_empty() {
        let _ = write!(line, " invalid={}", data.invalid_sections.len());
    }
    line
}

fn dump_velocity(out: &mut String, pad: &str, v: &LinearVelocity) {
    let _ = writeln!(
        out,
        "{}linear velocity: {} (valid={}, safe={}) / {} (valid={}, safe={})",
        pad,
        v.velocity_0,
        v.velocity_0_valid,
        v.velocity_0_transmitted_safely,
        v.velocity_1,
        v.velocity_1_valid,
        v.velocity_1_transmitted_safely
    );
}

fn dump_system_state(out: &mut String, s: &GeneralSystemState) {
    let _ = writeln!(out, "general system state:");
    let _ = writeln!(
        out,
        "  run={} standby={} contamination warning={} error={}",
        s.run_mode_active, s.standby_mode_active, s.contamination_warning, s.contamination_error
    );
    let _ = writeln!(
        out,
        "  reference contour={} manipulation={} application error={} device error={}",
        s.reference_contour_status, s.manipulation_status, s.application_error, s.device_error
    );
    let _ = writeln!(out, "  safe cut-off paths:      {}", format_flags(&s.safe_cut_off_path));
    let _ = writeln!(out, "  non-safe cut-off paths:  {}", format_flags(&s.non_safe_cut_off_path));
    let _ = writeln!(out, "  reset required paths:    {}", format_flags(&s.reset_required_cut_off_path));
    let _ = writeln!(out, "  monitoring cases: {:?}", s.current_monitoring_case_no);
}

fn dump_application(out: &mut String, app: &ApplicationData) {
    let i = &app.inputs;
    let o = &app.outputs;
    let _ = writeln!(out, "application inputs:");
    let _ = writeln!(out, "  unsafe input sources: {}", format_flags(&i.unsafe_inputs_input_sources));
    let _ = writeln!(out, "  unsafe input flags:   {}", format_flags(&i.unsafe_inputs_flags));
    let _ = writeln!(out, "  monitoring cases: {:?}", i.monitoring_case_numbers);
    dump_velocity(out, "  ", &i.linear_velocity);
    let _ = writeln!(out, "  sleep mode: {}", i.sleep_mode_input);
    let _ = writeln!(out, "application outputs:");
    let _ = writeln!(out, "  eval out:          {}", format_flags(&o.eval_out));
    let _ = writeln!(out, "  eval out is safe:  {}", format_flags(&o.eval_out_is_safe));
    let _ = writeln!(out, "  eval out is valid: {}", format_flags(&o.eval_out_is_valid));
    let _ = writeln!(out, "  monitoring cases: {:?}", o.monitoring_case_numbers);
    let _ = writeln!(
        out,
        "  sleep mode: {} (valid={})",
        o.sleep_mode_output, o.sleep_mode_output_valid
    );
    if o.host_error_flags_valid {
        let _ = writeln!(out, "  host errors: {:?}", o.host_error_flags);
    }
    dump_velocity(out, "  ", &o.linear_velocity);
    let _ = writeln!(out, "  resulting velocities: {:?}", o.resulting_velocities);
}

/// Multi-line dump of every present section.
pub fn dump_data(data: &Data) -> String {
    let mut out = String::new();
    let h = &data.header;
    let _ = writeln!(
        out,
        "header: version {}{}.{}.{} device #{} plug #{} channel {}",
        h.version_indicator as char,
        h.version_major,
        h.version_minor,
        h.version_release,
        h.serial_number_of_device,
        h.serial_number_of_system_plug,
        h.channel_number
    );
    let _ = writeln!(
        out,
        "  sequence {} scan {} day {} {}",
        h.sequence_number,
        h.scan_number,
        h.timestamp_date,
        format_time_of_day(h.timestamp_time)
    );
    if let Some(s) = &data.general_system_state {
        dump_system_state(&mut out, s);
    }
    if let Some(d) = &data.derived_values {
        let _ = writeln!(
            out,
            "derived values: factor {} beams {} scan time {} ms start {}° resolution {}° interbeam {} us",
            d.multiplication_factor,
            d.number_of_beams,
            d.scan_time,
            d.start_angle,
            d.angular_beam_resolution,
            d.interbeam_period
        );
    }
    if let Some(m) = &data.measurement_data {
        let valid = m.scan_points.iter().filter(|p| p.valid).count();
        let _ = writeln!(out, "measurement data: {} beams, {} valid", m.number_of_beams(), valid);
        if let (Some(first), Some(last)) = (m.scan_points.first(), m.scan_points.last()) {
            let _ = writeln!(out, "  angles {}° .. {}°", first.angle, last.angle);
        }
        if let Some(d) = &data.derived_values {
            let ranges = m.ranges(d);
            let min = ranges.iter().copied().fold(f32::INFINITY, f32::min);
            let max = ranges.iter().copied().fold(0.0f32, f32::max);
            if !ranges.is_empty() {
                let _ = writeln!(out, "  range {:.3} m .. {:.3} m", min, max);
            }
        }
    }
    if let Some(intrusion) = &data.intrusion_data {
        let _ = writeln!(out, "intrusion data: {} data", intrusion.data.len());
        for (i, datum) in intrusion.data.iter().enumerate() {
            let _ = writeln!(out, "  [{}] {}", i, format_flags(&datum.flags));
        }
    }
    if let Some(app) = &data.application_data {
        dump_application(&mut out, app);
    }
    for e in &data.invalid_sections {
        let _ = writeln!(out, "invalid: {}", e);
    }
    out
}
