//! Decoded scan frame: a mandatory [`DataHeader`] plus optional sections.
//!
//! A section is `None` when it was not part of the frame: disabled in the
//! [`Features`](crate::settings::Features), absent from the block table, or dropped
//! because it failed to decode (see [`Data::invalid_sections`]).

use crate::error::DecodeError;

pub const SAFE_CUT_OFF_PATHS: usize = 20;
pub const MONITORING_CASE_TABLES: usize = 4;
pub const UNSAFE_INPUTS: usize = 32;
pub const MONITORING_CASES: usize = 20;
pub const EVALUATION_PATHS: usize = 20;
pub const RESULTING_VELOCITIES: usize = 20;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Data {
    pub header: DataHeader,
    pub general_system_state: Option<GeneralSystemState>,
    pub derived_values: Option<DerivedValues>,
    pub measurement_data: Option<MeasurementData>,
    pub intrusion_data: Option<IntrusionData>,
    pub application_data: Option<ApplicationData>,
    /// Sections that were announced but failed to decode.
    pub invalid_sections: Vec<DecodeError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataHeader {
    pub version_indicator: u8,
    pub version_major: u8,
    pub version_minor: u8,
    pub version_release: u8,
    pub serial_number_of_device: u32,
    pub serial_number_of_system_plug: u32,
    pub channel_number: u8,
    pub sequence_number: u32,
    pub scan_number: u32,
    /// Days since 1972-01-01.
    pub timestamp_date: u16,
    /// Milliseconds since midnight.
    pub timestamp_time: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedValues {
    pub multiplication_factor: u16,
    pub number_of_beams: u16,
    /// Milliseconds.
    pub scan_time: u16,
    /// Degrees.
    pub start_angle: f32,
    /// Degrees per beam.
    pub angular_beam_resolution: f32,
    /// Microseconds.
    pub interbeam_period: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneralSystemState {
    pub run_mode_active: bool,
    pub standby_mode_active: bool,
    pub contamination_warning: bool,
    pub contamination_error: bool,
    pub reference_contour_status: bool,
    pub manipulation_status: bool,
    pub safe_cut_off_path: Vec<bool>,
    pub non_safe_cut_off_path: Vec<bool>,
    pub reset_required_cut_off_path: Vec<bool>,
    pub current_monitoring_case_no: [u8; MONITORING_CASE_TABLES],
    pub application_error: bool,
    pub device_error: bool,
}

/// One beam. Its index in [`MeasurementData::scan_points`] is the beam id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPoint {
    /// Raw distance; multiply by the derived multiplication factor for millimetres.
    pub distance: u16,
    pub reflectivity: u8,
    /// Degrees.
    pub angle: f32,
    pub valid: bool,
    pub infinite: bool,
    pub glare: bool,
    pub reflector: bool,
    pub contamination_warning: bool,
    pub contamination: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementData {
    pub scan_points: Vec<ScanPoint>,
}

impl MeasurementData {
    pub fn number_of_beams(&self) -> usize {
        self.scan_points.len()
    }

    /// Ranges in metres, scaled by the frame's multiplication factor.
    pub fn ranges(&self, derived: &DerivedValues) -> Vec<f32> {
        let factor = derived.multiplication_factor as f32 * 1e-3;
        self.scan_points
            .iter()
            .map(|p| p.distance as f32 * factor)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntrusionDatum {
    /// Size of the flag block in bytes.
    pub size: u32,
    pub flags: Vec<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntrusionData {
    pub data: Vec<IntrusionDatum>,
}

/// Linear velocity pair with validity and safe-transmission flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinearVelocity {
    pub velocity_0: i16,
    pub velocity_1: i16,
    pub velocity_0_valid: bool,
    pub velocity_1_valid: bool,
    pub velocity_0_transmitted_safely: bool,
    pub velocity_1_transmitted_safely: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationInputs {
    pub unsafe_inputs_input_sources: Vec<bool>,
    pub unsafe_inputs_flags: Vec<bool>,
    pub monitoring_case_numbers: Vec<u16>,
    pub monitoring_case_flags: Vec<bool>,
    pub linear_velocity: LinearVelocity,
    pub sleep_mode_input: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostErrorFlags {
    pub contamination_warning: bool,
    pub contamination_error: bool,
    pub manipulation_error: bool,
    pub glare: bool,
    pub reference_contour_intruded: bool,
    pub critical_error: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationOutputs {
    pub eval_out: Vec<bool>,
    pub eval_out_is_safe: Vec<bool>,
    pub eval_out_is_valid: Vec<bool>,
    pub monitoring_case_numbers: Vec<u16>,
    pub monitoring_case_flags: Vec<bool>,
    pub sleep_mode_output: u8,
    pub sleep_mode_output_valid: bool,
    pub host_error_flags_valid: bool,
    pub host_error_flags: HostErrorFlags,
    pub linear_velocity: LinearVelocity,
    pub resulting_velocities: Vec<i16>,
    pub resulting_velocity_flags: Vec<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationData {
    pub inputs: ApplicationInputs,
    pub outputs: ApplicationOutputs,
}
