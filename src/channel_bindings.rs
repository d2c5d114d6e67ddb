use crate::{Error, ErrorKind, Result};

// size of SEC_CHANNEL_BINDINGS structure
const SEC_CHANNEL_BINDINGS_SIZE: usize = 32;

/// Caller-supplied data identifying the transport underneath the context.
/// Mirrors the [SEC_CHANNEL_BINDINGS](https://docs.microsoft.com/en-us/windows/win32/api/sspi/ns-sspi-sec_channel_bindings)
/// structure; its digest is mixed into the authenticator checksum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelBindings {
    pub initiator_addr_type: u32,
    pub initiator: Vec<u8>,
    pub acceptor_addr_type: u32,
    pub acceptor: Vec<u8>,
    pub application_data: Vec<u8>,
}

impl ChannelBindings {
    /// Parses the flat SEC_CHANNEL_BINDINGS buffer layout: three
    /// (type, length, offset) descriptors followed by the referenced data.
    pub fn from_bytes<T: AsRef<[u8]>>(data: T) -> Result<Self> {
        let data = data.as_ref();

        if data.len() < SEC_CHANNEL_BINDINGS_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                format!(
                    "Invalid SEC_CHANNEL_BINDINGS buffer: buffer is too short: {}. Minimum len: {}",
                    data.len(),
                    SEC_CHANNEL_BINDINGS_SIZE,
                ),
            ));
        }

        let initiator_addr_type = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let initiator = Self::read_section(data, 4, "initiator")?;

        let acceptor_addr_type = u32::from_le_bytes(data[12..16].try_into().unwrap());
        let acceptor = Self::read_section(data, 16, "acceptor")?;

        let application_data = Self::read_section(data, 24, "application")?;

        Ok(Self {
            initiator_addr_type,
            initiator,
            acceptor_addr_type,
            acceptor,
            application_data,
        })
    }

    fn read_section(data: &[u8], descriptor_offset: usize, name: &str) -> Result<Vec<u8>> {
        let len = u32::from_le_bytes(data[descriptor_offset..descriptor_offset + 4].try_into().unwrap()) as usize;
        let offset =
            u32::from_le_bytes(data[descriptor_offset + 4..descriptor_offset + 8].try_into().unwrap()) as usize;

        if offset + len > data.len() {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                format!(
                    "Invalid SEC_CHANNEL_BINDINGS buffer: {} offset + len ({}) goes outside the buffer ({})",
                    name,
                    offset + len,
                    data.len()
                ),
            ));
        }

        if len > 0 {
            Ok(data[offset..offset + len].to_vec())
        } else {
            Ok(Vec::new())
        }
    }

    /// Flat encoding digested into the authenticator checksum: each address
    /// carries its type and length as 32-bit little-endian prefixes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            20 + self.initiator.len() + self.acceptor.len() + self.application_data.len(),
        );

        out.extend_from_slice(&self.initiator_addr_type.to_le_bytes());
        out.extend_from_slice(&(self.initiator.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.initiator);

        out.extend_from_slice(&self.acceptor_addr_type.to_le_bytes());
        out.extend_from_slice(&(self.acceptor.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.acceptor);

        out.extend_from_slice(&(self.application_data.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.application_data);

        out
    }

    pub(crate) fn is_empty_or_zero(&self) -> bool {
        self.initiator_addr_type == 0
            && self.acceptor_addr_type == 0
            && self.initiator.iter().all(|b| *b == 0)
            && self.acceptor.iter().all(|b| *b == 0)
            && self.application_data.iter().all(|b| *b == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::ChannelBindings;

    #[test]
    fn from_bytes() {
        let expected = ChannelBindings {
            initiator_addr_type: 0,
            initiator: Vec::new(),
            acceptor_addr_type: 0,
            acceptor: Vec::new(),
            application_data: vec![1, 2, 3, 4],
        };

        let channel_bindings_token = [1, 2, 3, 4];
        let application_offset = 32_u32;
        let application_len = channel_bindings_token.len();

        let mut buffer = [0; 36];

        buffer[24..28].copy_from_slice(&(application_len as u32).to_le_bytes());
        buffer[28..32].copy_from_slice(&application_offset.to_le_bytes());
        buffer[32..].copy_from_slice(&channel_bindings_token);

        let channel_bindings = ChannelBindings::from_bytes(buffer).unwrap();

        assert_eq!(channel_bindings, expected);
    }

    #[test]
    fn too_small_buffer() {
        assert!(ChannelBindings::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]).is_err());

        assert!(ChannelBindings::from_bytes([]).is_err());
    }

    #[test]
    fn invalid_len() {
        let channel_bindings_token = [1, 2, 3, 4];
        let application_offset = 32_u32;
        // invalid len
        let application_len = channel_bindings_token.len() + 2;

        let mut buffer = [0; 36];

        buffer[24..28].copy_from_slice(&(application_len as u32).to_le_bytes());
        buffer[28..32].copy_from_slice(&application_offset.to_le_bytes());
        buffer[32..].copy_from_slice(&channel_bindings_token);

        assert!(ChannelBindings::from_bytes(buffer).is_err());
    }

    #[test]
    fn invalid_offset() {
        let channel_bindings_token = [1, 2, 3, 4];
        // invalid offset
        let application_offset = 32_u32 + 3;
        let application_len = channel_bindings_token.len();

        let mut buffer = [0; 36];

        buffer[24..28].copy_from_slice(&(application_len as u32).to_le_bytes());
        buffer[28..32].copy_from_slice(&application_offset.to_le_bytes());
        buffer[32..].copy_from_slice(&channel_bindings_token);

        assert!(ChannelBindings::from_bytes(buffer).is_err());
    }

    #[test]
    fn encode_prefixes_lengths() {
        let bindings = ChannelBindings {
            initiator_addr_type: 0,
            initiator: Vec::new(),
            acceptor_addr_type: 0,
            acceptor: Vec::new(),
            application_data: vec![0xaa, 0xbb],
        };

        let encoded = bindings.encode();

        assert_eq!(
            vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0xaa, 0xbb],
            encoded
        );
    }
}
