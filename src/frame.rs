//! Scan frame handling: decode a reassembled frame payload into [`Data`], section by section.
//!
//! The [`DataHeader`] carries a block table (offset, size) for the five optional sections.
//! A corrupt header invalidates the whole frame. Any other section that fails to decode is
//! dropped (left `None`) and recorded in [`Data::invalid_sections`]; the remaining sections
//! are still decoded. Sections whose feature is disabled are never decoded.
//!
//! [`encode_data`] writes the same layout and is used to replay or simulate sensor output.

use crate::codec::{u16_len, ByteReader, ByteWriter, CodecError};
use crate::data::*;
use crate::error::{DecodeError, InSection, Section};
use crate::settings::Features;

pub const DATA_HEADER_LEN: usize = 52;
pub const DERIVED_VALUES_LEN: usize = 20;
pub const GENERAL_SYSTEM_STATE_LEN: usize = 15;
const SCAN_POINT_LEN: usize = 4;

/// Position of one optional section inside the frame payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub offset: u16,
    pub size: u16,
}

impl BlockDescriptor {
    pub fn is_present(&self) -> bool {
        self.size != 0
    }
}

/// Block table in header order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockTable {
    pub general_system_state: BlockDescriptor,
    pub derived_values: BlockDescriptor,
    pub measurement_data: BlockDescriptor,
    pub intrusion_data: BlockDescriptor,
    pub application_data: BlockDescriptor,
}

/// Decode a complete frame payload.
///
/// Returns `Err` only when the data header itself is unusable.
pub fn decode_data(payload: &[u8], features: &Features) -> Result<Data, DecodeError> {
    let (header, blocks) = decode_header(payload)?;
    let mut data = Data {
        header,
        ..Data::default()
    };

    // Derived values first: measurement angles depend on them.
    data.derived_values = decode_section(
        payload,
        features.derived_values,
        blocks.derived_values,
        Section::DerivedValues,
        &mut data.invalid_sections,
        decode_derived_values,
    );
    data.general_system_state = decode_section(
        payload,
        features.general_system_state,
        blocks.general_system_state,
        Section::GeneralSystemState,
        &mut data.invalid_sections,
        decode_general_system_state,
    );
    let derived = data.derived_values.clone();
    data.measurement_data = decode_section(
        payload,
        features.measurement_data,
        blocks.measurement_data,
        Section::MeasurementData,
        &mut data.invalid_sections,
        |r| decode_measurement_data(r, derived.as_ref()),
    );
    data.intrusion_data = decode_section(
        payload,
        features.intrusion_data,
        blocks.intrusion_data,
        Section::IntrusionData,
        &mut data.invalid_sections,
        decode_intrusion_data,
    );
    data.application_data = decode_section(
        payload,
        features.application_data,
        blocks.application_data,
        Section::ApplicationData,
        &mut data.invalid_sections,
        decode_application_data,
    );

    Ok(data)
}

fn decode_section<T, F>(
    payload: &[u8],
    enabled: bool,
    block: BlockDescriptor,
    section: Section,
    invalid: &mut Vec<DecodeError>,
    decode: F,
) -> Option<T>
where
    F: FnOnce(&mut ByteReader<'_>) -> Result<T, DecodeError>,
{
    if !enabled || !block.is_present() {
        return None;
    }
    #[cfg(feature = "frame_decode_profile")]
    let started = std::time::Instant::now();

    let result = block_slice(payload, block, section).and_then(|bytes| {
        let mut r = ByteReader::new(bytes);
        decode(&mut r)
    });

    #[cfg(feature = "frame_decode_profile")]
    log::trace!("{} decoded in {:?}", section, started.elapsed());

    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("dropping section: {}", e);
            invalid.push(e);
            None
        }
    }
}

fn block_slice(payload: &[u8], block: BlockDescriptor, section: Section) -> Result<&[u8], DecodeError> {
    let offset = block.offset as usize;
    let size = block.size as usize;
    if offset < DATA_HEADER_LEN || offset + size > payload.len() {
        return Err(DecodeError::BlockOutOfBounds {
            section,
            offset,
            size,
            frame_len: payload.len(),
        });
    }
    Ok(&payload[offset..offset + size])
}

pub fn decode_header(payload: &[u8]) -> Result<(DataHeader, BlockTable), DecodeError> {
    const S: Section = Section::DataHeader;
    if payload.len() < DATA_HEADER_LEN {
        return Err(DecodeError::invalid(
            S,
            format!("frame of {} bytes is shorter than the {}-byte header", payload.len(), DATA_HEADER_LEN),
        ));
    }
    let mut r = ByteReader::new(payload);
    let version_indicator = r.read_u8().in_section(S)?;
    let version_major = r.read_u8().in_section(S)?;
    let version_minor = r.read_u8().in_section(S)?;
    let version_release = r.read_u8().in_section(S)?;
    let serial_number_of_device = r.read_u32().in_section(S)?;
    let serial_number_of_system_plug = r.read_u32().in_section(S)?;
    let channel_number = r.read_u8().in_section(S)?;
    r.skip(3).in_section(S)?;
    let sequence_number = r.read_u32().in_section(S)?;
    let scan_number = r.read_u32().in_section(S)?;
    let timestamp_date = r.read_u16().in_section(S)?;
    r.skip(2).in_section(S)?;
    let timestamp_time = r.read_u32().in_section(S)?;

    let mut read_block = || -> Result<BlockDescriptor, DecodeError> {
        Ok(BlockDescriptor {
            offset: r.read_u16().in_section(S)?,
            size: r.read_u16().in_section(S)?,
        })
    };
    let blocks = BlockTable {
        general_system_state: read_block()?,
        derived_values: read_block()?,
        measurement_data: read_block()?,
        intrusion_data: read_block()?,
        application_data: read_block()?,
    };

    let header = DataHeader {
        version_indicator,
        version_major,
        version_minor,
        version_release,
        serial_number_of_device,
        serial_number_of_system_plug,
        channel_number,
        sequence_number,
        scan_number,
        timestamp_date,
        timestamp_time,
    };
    Ok((header, blocks))
}

fn decode_derived_values(r: &mut ByteReader<'_>) -> Result<DerivedValues, DecodeError> {
    const S: Section = Section::DerivedValues;
    let multiplication_factor = r.read_u16().in_section(S)?;
    let number_of_beams = r.read_u16().in_section(S)?;
    let scan_time = r.read_u16().in_section(S)?;
    r.skip(2).in_section(S)?;
    let start_angle = r.read_f32().in_section(S)?;
    let angular_beam_resolution = r.read_f32().in_section(S)?;
    let interbeam_period = r.read_u32().in_section(S)?;
    Ok(DerivedValues {
        multiplication_factor,
        number_of_beams,
        scan_time,
        start_angle,
        angular_beam_resolution,
        interbeam_period,
    })
}

fn decode_general_system_state(r: &mut ByteReader<'_>) -> Result<GeneralSystemState, DecodeError> {
    const S: Section = Section::GeneralSystemState;
    let state = r.read_flags(8).in_section(S)?;
    let safe_cut_off_path = r.read_flags(SAFE_CUT_OFF_PATHS).in_section(S)?;
    let non_safe_cut_off_path = r.read_flags(SAFE_CUT_OFF_PATHS).in_section(S)?;
    let reset_required_cut_off_path = r.read_flags(SAFE_CUT_OFF_PATHS).in_section(S)?;
    let mut current_monitoring_case_no = [0u8; MONITORING_CASE_TABLES];
    for case in current_monitoring_case_no.iter_mut() {
        *case = r.read_u8().in_section(S)?;
    }
    let errors = r.read_flags(8).in_section(S)?;
    Ok(GeneralSystemState {
        run_mode_active: state[0],
        standby_mode_active: state[1],
        contamination_warning: state[2],
        contamination_error: state[3],
        reference_contour_status: state[4],
        manipulation_status: state[5],
        safe_cut_off_path,
        non_safe_cut_off_path,
        reset_required_cut_off_path,
        current_monitoring_case_no,
        application_error: errors[0],
        device_error: errors[1],
    })
}

fn decode_measurement_data(
    r: &mut ByteReader<'_>,
    derived: Option<&DerivedValues>,
) -> Result<MeasurementData, DecodeError> {
    const S: Section = Section::MeasurementData;
    let derived = derived.ok_or_else(|| {
        DecodeError::invalid(S, "beam angles need derived values, which are missing from this frame")
    })?;
    let beams = r.read_u32().in_section(S)? as usize;
    let available = r.remaining() / SCAN_POINT_LEN;
    if beams > available {
        return Err(DecodeError::invalid(
            S,
            format!("beam count {} but only {} scan points present", beams, available),
        ));
    }
    let mut scan_points = Vec::with_capacity(beams);
    for i in 0..beams {
        let distance = r.read_u16().in_section(S)?;
        let reflectivity = r.read_u8().in_section(S)?;
        let status = r.read_flags(8).in_section(S)?;
        scan_points.push(ScanPoint {
            distance,
            reflectivity,
            angle: derived.start_angle + i as f32 * derived.angular_beam_resolution,
            valid: status[0],
            infinite: status[1],
            glare: status[2],
            reflector: status[3],
            contamination_warning: status[4],
            contamination: status[5],
        });
    }
    Ok(MeasurementData { scan_points })
}

fn decode_intrusion_data(r: &mut ByteReader<'_>) -> Result<IntrusionData, DecodeError> {
    const S: Section = Section::IntrusionData;
    let count = r.read_u32().in_section(S)? as usize;
    // every datum carries at least its 4-byte size
    if count > r.remaining() / 4 {
        return Err(DecodeError::invalid(
            S,
            format!("datum count {} cannot fit in {} bytes", count, r.remaining()),
        ));
    }
    let mut data = Vec::with_capacity(count);
    for _ in 0..count {
        let size = r.read_u32().in_section(S)?;
        let flags = r.read_flags(size as usize * 8).in_section(S)?;
        data.push(IntrusionDatum { size, flags });
    }
    Ok(IntrusionData { data })
}

fn read_linear_velocity(r: &mut ByteReader<'_>, section: Section) -> Result<LinearVelocity, DecodeError> {
    let velocity_0 = r.read_i16().in_section(section)?;
    let velocity_1 = r.read_i16().in_section(section)?;
    let flags = r.read_flags(8).in_section(section)?;
    Ok(LinearVelocity {
        velocity_0,
        velocity_1,
        velocity_0_valid: flags[0],
        velocity_1_valid: flags[1],
        velocity_0_transmitted_safely: flags[2],
        velocity_1_transmitted_safely: flags[3],
    })
}

fn read_u16_array(r: &mut ByteReader<'_>, n: usize, section: Section) -> Result<Vec<u16>, DecodeError> {
    (0..n).map(|_| r.read_u16().in_section(section)).collect()
}

fn decode_application_data(r: &mut ByteReader<'_>) -> Result<ApplicationData, DecodeError> {
    const S: Section = Section::ApplicationData;
    let inputs = ApplicationInputs {
        unsafe_inputs_input_sources: r.read_flags(UNSAFE_INPUTS).in_section(S)?,
        unsafe_inputs_flags: r.read_flags(UNSAFE_INPUTS).in_section(S)?,
        monitoring_case_numbers: read_u16_array(r, MONITORING_CASES, S)?,
        monitoring_case_flags: r.read_flags(MONITORING_CASES).in_section(S)?,
        linear_velocity: read_linear_velocity(r, S)?,
        sleep_mode_input: r.read_u8().in_section(S)?,
    };

    let eval_out = r.read_flags(EVALUATION_PATHS).in_section(S)?;
    let eval_out_is_safe = r.read_flags(EVALUATION_PATHS).in_section(S)?;
    let eval_out_is_valid = r.read_flags(EVALUATION_PATHS).in_section(S)?;
    let monitoring_case_numbers = read_u16_array(r, MONITORING_CASES, S)?;
    let monitoring_case_flags = r.read_flags(MONITORING_CASES).in_section(S)?;
    let sleep_mode_output = r.read_u8().in_section(S)?;
    let output_flags = r.read_flags(8).in_section(S)?;
    let error_flags = r.read_flags(8).in_section(S)?;
    let linear_velocity = read_linear_velocity(r, S)?;
    let resulting_velocities = (0..RESULTING_VELOCITIES)
        .map(|_| r.read_i16().in_section(S))
        .collect::<Result<Vec<_>, _>>()?;
    let resulting_velocity_flags = r.read_flags(RESULTING_VELOCITIES).in_section(S)?;

    let outputs = ApplicationOutputs {
        eval_out,
        eval_out_is_safe,
        eval_out_is_valid,
        monitoring_case_numbers,
        monitoring_case_flags,
        sleep_mode_output,
        sleep_mode_output_valid: output_flags[0],
        host_error_flags_valid: output_flags[1],
        host_error_flags: HostErrorFlags {
            contamination_warning: error_flags[0],
            contamination_error: error_flags[1],
            manipulation_error: error_flags[2],
            glare: error_flags[3],
            reference_contour_intruded: error_flags[4],
            critical_error: error_flags[5],
        },
        linear_velocity,
        resulting_velocities,
        resulting_velocity_flags,
    };
    Ok(ApplicationData { inputs, outputs })
}

/// Encode a frame payload. Sections that are `None` get an empty block descriptor.
///
/// Fixed-size groups are padded or cut to their wire length. Scan point angles are not
/// transmitted; the decoder derives them from the derived values.
///
/// Fails when a block offset or size does not fit the 16-bit block table.
pub fn encode_data(data: &Data) -> Result<Vec<u8>, CodecError> {
    let mut sections: [Vec<u8>; 5] = Default::default();
    if let Some(gss) = &data.general_system_state {
        encode_general_system_state(gss, &mut sections[0]);
    }
    if let Some(derived) = &data.derived_values {
        encode_derived_values(derived, &mut sections[1]);
    }
    if let Some(measurement) = &data.measurement_data {
        encode_measurement_data(measurement, &mut sections[2]);
    }
    if let Some(intrusion) = &data.intrusion_data {
        encode_intrusion_data(intrusion, &mut sections[3]);
    }
    if let Some(app) = &data.application_data {
        encode_application_data(app, &mut sections[4]);
    }

    let mut out = Vec::with_capacity(DATA_HEADER_LEN + sections.iter().map(Vec::len).sum::<usize>());
    let mut w = ByteWriter::new(&mut out);
    let h = &data.header;
    w.write_u8(h.version_indicator);
    w.write_u8(h.version_major);
    w.write_u8(h.version_minor);
    w.write_u8(h.version_release);
    w.write_u32(h.serial_number_of_device);
    w.write_u32(h.serial_number_of_system_plug);
    w.write_u8(h.channel_number);
    w.write_zeros(3);
    w.write_u32(h.sequence_number);
    w.write_u32(h.scan_number);
    w.write_u16(h.timestamp_date);
    w.write_zeros(2);
    w.write_u32(h.timestamp_time);

    let mut offset = DATA_HEADER_LEN;
    for section in &sections {
        if section.is_empty() {
            w.write_u16(0);
            w.write_u16(0);
        } else {
            w.write_u16(u16_len("block offset", offset)?);
            w.write_u16(u16_len("block size", section.len())?);
            offset += section.len();
        }
    }
    for section in &sections {
        w.write_bytes(section);
    }
    Ok(out)
}

fn encode_general_system_state(s: &GeneralSystemState, buf: &mut Vec<u8>) {
    let mut w = ByteWriter::new(buf);
    w.write_flags(&[
        s.run_mode_active,
        s.standby_mode_active,
        s.contamination_warning,
        s.contamination_error,
        s.reference_contour_status,
        s.manipulation_status,
        false,
        false,
    ]);
    w.write_flags_fixed(&s.safe_cut_off_path, SAFE_CUT_OFF_PATHS);
    w.write_flags_fixed(&s.non_safe_cut_off_path, SAFE_CUT_OFF_PATHS);
    w.write_flags_fixed(&s.reset_required_cut_off_path, SAFE_CUT_OFF_PATHS);
    w.write_bytes(&s.current_monitoring_case_no);
    w.write_flags_fixed(&[s.application_error, s.device_error], 8);
}

fn encode_derived_values(d: &DerivedValues, buf: &mut Vec<u8>) {
    let mut w = ByteWriter::new(buf);
    w.write_u16(d.multiplication_factor);
    w.write_u16(d.number_of_beams);
    w.write_u16(d.scan_time);
    w.write_zeros(2);
    w.write_f32(d.start_angle);
    w.write_f32(d.angular_beam_resolution);
    w.write_u32(d.interbeam_period);
}

fn encode_measurement_data(m: &MeasurementData, buf: &mut Vec<u8>) {
    let mut w = ByteWriter::new(buf);
    w.write_u32(m.scan_points.len() as u32);
    for p in &m.scan_points {
        w.write_u16(p.distance);
        w.write_u8(p.reflectivity);
        w.write_flags_fixed(
            &[p.valid, p.infinite, p.glare, p.reflector, p.contamination_warning, p.contamination],
            8,
        );
    }
}

fn encode_intrusion_data(d: &IntrusionData, buf: &mut Vec<u8>) {
    let mut w = ByteWriter::new(buf);
    w.write_u32(d.data.len() as u32);
    for datum in &d.data {
        w.write_u32(datum.size);
        w.write_flags_fixed(&datum.flags, datum.size as usize * 8);
    }
}

fn write_linear_velocity(w: &mut ByteWriter<'_>, v: &LinearVelocity) {
    w.write_i16(v.velocity_0);
    w.write_i16(v.velocity_1);
    w.write_flags_fixed(
        &[
            v.velocity_0_valid,
            v.velocity_1_valid,
            v.velocity_0_transmitted_safely,
            v.velocity_1_transmitted_safely,
        ],
        8,
    );
}

fn write_u16_array(w: &mut ByteWriter<'_>, values: &[u16], n: usize) {
    for i in 0..n {
        w.write_u16(values.get(i).copied().unwrap_or(0));
    }
}

fn encode_application_data(a: &ApplicationData, buf: &mut Vec<u8>) {
    let mut w = ByteWriter::new(buf);
    let i = &a.inputs;
    w.write_flags_fixed(&i.unsafe_inputs_input_sources, UNSAFE_INPUTS);
    w.write_flags_fixed(&i.unsafe_inputs_flags, UNSAFE_INPUTS);
    write_u16_array(&mut w, &i.monitoring_case_numbers, MONITORING_CASES);
    w.write_flags_fixed(&i.monitoring_case_flags, MONITORING_CASES);
    write_linear_velocity(&mut w, &i.linear_velocity);
    w.write_u8(i.sleep_mode_input);

    let o = &a.outputs;
    w.write_flags_fixed(&o.eval_out, EVALUATION_PATHS);
    w.write_flags_fixed(&o.eval_out_is_safe, EVALUATION_PATHS);
    w.write_flags_fixed(&o.eval_out_is_valid, EVALUATION_PATHS);
    write_u16_array(&mut w, &o.monitoring_case_numbers, MONITORING_CASES);
    w.write_flags_fixed(&o.monitoring_case_flags, MONITORING_CASES);
    w.write_u8(o.sleep_mode_output);
    w.write_flags_fixed(&[o.sleep_mode_output_valid, o.host_error_flags_valid], 8);
    let e = &o.host_error_flags;
    w.write_flags_fixed(
        &[
            e.contamination_warning,
            e.contamination_error,
            e.manipulation_error,
            e.glare,
            e.reference_contour_intruded,
            e.critical_error,
        ],
        8,
    );
    write_linear_velocity(&mut w, &o.linear_velocity);
    for k in 0..RESULTING_VELOCITIES {
        w.write_i16(o.resulting_velocities.get(k).copied().unwrap_or(0));
    }
    w.write_flags_fixed(&o.resulting_velocity_flags, RESULTING_VELOCITIES);
}
