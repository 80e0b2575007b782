//! Descriptor-update-template precomputation.
//!
//! When the application creates an update template, the entries are sorted by
//! descriptor kind into tightly packed per-kind lists so the serializer can
//! emit image infos, then buffer infos, then texel buffer views regardless of
//! the application's interleaving. That ordering is part of the wire
//! contract.

use recap_format::HandleId;
use tracing::{error, warn};

use crate::thread_data::ParameterEncoder;

/// Serialized byte widths of the per-kind descriptor payloads read from the
/// application's opaque data blob.
pub const DESCRIPTOR_IMAGE_INFO_SIZE: usize = 24;
pub const DESCRIPTOR_BUFFER_INFO_SIZE: usize = 24;
pub const TEXEL_BUFFER_VIEW_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum DescriptorType {
    Sampler = 0,
    CombinedImageSampler = 1,
    SampledImage = 2,
    StorageImage = 3,
    UniformTexelBuffer = 4,
    StorageTexelBuffer = 5,
    UniformBuffer = 6,
    StorageBuffer = 7,
    UniformBufferDynamic = 8,
    StorageBufferDynamic = 9,
    InputAttachment = 10,
}

impl DescriptorType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Sampler),
            1 => Some(Self::CombinedImageSampler),
            2 => Some(Self::SampledImage),
            3 => Some(Self::StorageImage),
            4 => Some(Self::UniformTexelBuffer),
            5 => Some(Self::StorageTexelBuffer),
            6 => Some(Self::UniformBuffer),
            7 => Some(Self::StorageBuffer),
            8 => Some(Self::UniformBufferDynamic),
            9 => Some(Self::StorageBufferDynamic),
            10 => Some(Self::InputAttachment),
            _ => None,
        }
    }

    fn kind(self) -> DescriptorKind {
        match self {
            Self::Sampler
            | Self::CombinedImageSampler
            | Self::SampledImage
            | Self::StorageImage
            | Self::InputAttachment => DescriptorKind::Image,
            Self::UniformBuffer
            | Self::StorageBuffer
            | Self::UniformBufferDynamic
            | Self::StorageBufferDynamic => DescriptorKind::Buffer,
            Self::UniformTexelBuffer | Self::StorageTexelBuffer => DescriptorKind::TexelBufferView,
        }
    }

    fn entry_size(self) -> usize {
        match self.kind() {
            DescriptorKind::Image => DESCRIPTOR_IMAGE_INFO_SIZE,
            DescriptorKind::Buffer => DESCRIPTOR_BUFFER_INFO_SIZE,
            DescriptorKind::TexelBufferView => TEXEL_BUFFER_VIEW_SIZE,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DescriptorKind {
    Image,
    Buffer,
    TexelBufferView,
}

/// One template entry as supplied by the application at template creation.
/// `descriptor_type` is the raw API value; unrecognized values are dropped
/// with an error log.
#[derive(Clone, Copy, Debug)]
pub struct UpdateTemplateEntryCreateInfo {
    pub binding: u32,
    pub array_element: u32,
    pub count: u32,
    pub offset: usize,
    pub stride: usize,
    pub descriptor_type: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateTemplateEntry {
    pub binding: u32,
    pub array_element: u32,
    pub count: u32,
    pub offset: usize,
    pub stride: usize,
    pub descriptor_type: DescriptorType,
}

#[derive(Debug, Default)]
pub struct UpdateTemplateInfo {
    pub image_infos: Vec<UpdateTemplateEntry>,
    pub buffer_infos: Vec<UpdateTemplateEntry>,
    pub texel_buffer_views: Vec<UpdateTemplateEntry>,
    pub image_info_count: u32,
    pub buffer_info_count: u32,
    pub texel_buffer_view_count: u32,
    /// Largest byte extent any entry reads from the application's data blob;
    /// bounds later reads of the opaque pointer.
    pub max_size: usize,
}

/// Per-template wrapper owned by the shim layer's handle table.
#[derive(Debug, Default)]
pub struct DescriptorUpdateTemplateWrapper {
    pub handle_id: HandleId,
    pub info: UpdateTemplateInfo,
}

pub(crate) fn build_update_template_info(
    entries: &[UpdateTemplateEntryCreateInfo],
) -> UpdateTemplateInfo {
    let mut info = UpdateTemplateInfo::default();

    for raw in entries {
        let Some(descriptor_type) = DescriptorType::from_u32(raw.descriptor_type) else {
            error!(
                descriptor_type = raw.descriptor_type,
                binding = raw.binding,
                "unrecognized descriptor type in descriptor update template"
            );
            continue;
        };

        let entry = UpdateTemplateEntry {
            binding: raw.binding,
            array_element: raw.array_element,
            count: raw.count,
            offset: raw.offset,
            stride: raw.stride,
            descriptor_type,
        };

        let entry_size = descriptor_type.entry_size();
        match descriptor_type.kind() {
            DescriptorKind::Image => {
                info.image_info_count += entry.count;
                info.image_infos.push(entry);
            }
            DescriptorKind::Buffer => {
                info.buffer_info_count += entry.count;
                info.buffer_infos.push(entry);
            }
            DescriptorKind::TexelBufferView => {
                info.texel_buffer_view_count += entry.count;
                info.texel_buffer_views.push(entry);
            }
        }

        if entry.count > 0 {
            let max_size = (entry.count as usize - 1) * entry.stride + entry.offset + entry_size;
            info.max_size = info.max_size.max(max_size);
        }
    }

    info
}

/// Append the template's descriptor payloads to `encoder` as packed per-kind
/// runs: image infos, then buffer infos, then texel buffer views.
pub fn encode_update_template_data(
    info: &UpdateTemplateInfo,
    data: &[u8],
    encoder: &mut ParameterEncoder,
) {
    for list in [&info.image_infos, &info.buffer_infos, &info.texel_buffer_views] {
        for entry in list {
            let entry_size = entry.descriptor_type.entry_size();
            for i in 0..entry.count as usize {
                let start = entry.offset + i * entry.stride;
                let Some(chunk) = start
                    .checked_add(entry_size)
                    .and_then(|end| data.get(start..end))
                else {
                    warn!(
                        binding = entry.binding,
                        "descriptor update data blob is shorter than the template requires"
                    );
                    break;
                };
                encoder.write_bytes(chunk);
            }
        }
    }
}
