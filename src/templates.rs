//! ONVIF SOAP XML response templates.
//!
//! All envelopes emitted by the device façade and the discovery responder
//! are built here so the element names and namespaces interoperability
//! depends on live in one place.

use quick_xml::escape::escape;

/// Escape a string for safe inclusion in XML content/attributes.
pub fn xml_escape(s: &str) -> String {
    escape(s).to_string()
}

/// Generic SOAP fault response.
pub fn fault(subcode: &str, reason: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:ter="http://www.onvif.org/ver10/error">
  <s:Body>
    <s:Fault>
      <s:Code>
        <s:Value>s:Sender</s:Value>
        <s:Subcode>
          <s:Value>{}</s:Value>
        </s:Subcode>
      </s:Code>
      <s:Reason>
        <s:Text xml:lang="en">{}</s:Text>
      </s:Reason>
    </s:Fault>
  </s:Body>
</s:Envelope>"#,
        xml_escape(subcode),
        xml_escape(reason)
    )
}

/// Authentication fault with the NotAuthorized subcode. The reason text is
/// generic on purpose; expected digest values never reach the client.
pub fn auth_fault(reason: &str) -> String {
    fault("ter:NotAuthorized", reason)
}

pub struct DateTimeParts {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

pub fn get_system_date_and_time_response(
    timezone: &str,
    dst: bool,
    utc: &DateTimeParts,
    local: &DateTimeParts,
) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:tds="http://www.onvif.org/ver10/device/wsdl"
            xmlns:tt="http://www.onvif.org/ver10/schema">
  <s:Body>
    <tds:GetSystemDateAndTimeResponse>
      <tds:SystemDateAndTime>
        <tt:DateTimeType>NTP</tt:DateTimeType>
        <tt:DaylightSavings>{dst}</tt:DaylightSavings>
        <tt:TimeZone>
          <tt:TZ>{tz}</tt:TZ>
        </tt:TimeZone>
        <tt:UTCDateTime>
          <tt:Time><tt:Hour>{uh}</tt:Hour><tt:Minute>{umin}</tt:Minute><tt:Second>{us}</tt:Second></tt:Time>
          <tt:Date><tt:Year>{uy}</tt:Year><tt:Month>{umo}</tt:Month><tt:Day>{ud}</tt:Day></tt:Date>
        </tt:UTCDateTime>
        <tt:LocalDateTime>
          <tt:Time><tt:Hour>{lh}</tt:Hour><tt:Minute>{lmin}</tt:Minute><tt:Second>{ls}</tt:Second></tt:Time>
          <tt:Date><tt:Year>{ly}</tt:Year><tt:Month>{lmo}</tt:Month><tt:Day>{ld}</tt:Day></tt:Date>
        </tt:LocalDateTime>
      </tds:SystemDateAndTime>
    </tds:GetSystemDateAndTimeResponse>
  </s:Body>
</s:Envelope>"#,
        dst = dst,
        tz = xml_escape(timezone),
        uh = utc.hour,
        umin = utc.minute,
        us = utc.second,
        uy = utc.year,
        umo = utc.month,
        ud = utc.day,
        lh = local.hour,
        lmin = local.minute,
        ls = local.second,
        ly = local.year,
        lmo = local.month,
        ld = local.day,
    )
}

fn device_capabilities_block(device_xaddr: &str, minor_version: u16) -> String {
    format!(
        r#"
        <tt:Device>
          <tt:XAddr>{}</tt:XAddr>
          <tt:Network>
            <tt:IPFilter>false</tt:IPFilter>
            <tt:ZeroConfiguration>false</tt:ZeroConfiguration>
            <tt:IPVersion6>false</tt:IPVersion6>
            <tt:DynDNS>false</tt:DynDNS>
          </tt:Network>
          <tt:System>
            <tt:DiscoveryResolve>false</tt:DiscoveryResolve>
            <tt:DiscoveryBye>false</tt:DiscoveryBye>
            <tt:RemoteDiscovery>false</tt:RemoteDiscovery>
            <tt:SystemBackup>false</tt:SystemBackup>
            <tt:SystemLogging>false</tt:SystemLogging>
            <tt:FirmwareUpgrade>false</tt:FirmwareUpgrade>
            <tt:SupportedVersions>
              <tt:Major>2</tt:Major>
              <tt:Minor>{}</tt:Minor>
            </tt:SupportedVersions>
          </tt:System>
          <tt:IO>
            <tt:InputConnectors>0</tt:InputConnectors>
            <tt:RelayOutputs>1</tt:RelayOutputs>
          </tt:IO>
          <tt:Security>
            <tt:TLS1.1>false</tt:TLS1.1>
            <tt:TLS1.2>false</tt:TLS1.2>
            <tt:OnboardKeyGeneration>false</tt:OnboardKeyGeneration>
            <tt:AccessPolicyConfig>false</tt:AccessPolicyConfig>
            <tt:X.509Token>false</tt:X.509Token>
            <tt:SAMLToken>false</tt:SAMLToken>
            <tt:KerberosToken>false</tt:KerberosToken>
            <tt:RELToken>false</tt:RELToken>
          </tt:Security>
        </tt:Device>"#,
        xml_escape(device_xaddr),
        minor_version
    )
}

fn media_capabilities_block(media_xaddr: &str, profile_count: usize) -> String {
    format!(
        r#"
        <tt:Media>
          <tt:XAddr>{}</tt:XAddr>
          <tt:StreamingCapabilities>
            <tt:RTPMulticast>false</tt:RTPMulticast>
            <tt:RTP_TCP>true</tt:RTP_TCP>
            <tt:RTP_RTSP_TCP>true</tt:RTP_RTSP_TCP>
          </tt:StreamingCapabilities>
          <tt:Extension>
            <tt:ProfileCapabilities>
              <tt:MaximumNumberOfProfiles>{}</tt:MaximumNumberOfProfiles>
            </tt:ProfileCapabilities>
          </tt:Extension>
        </tt:Media>"#,
        xml_escape(media_xaddr),
        profile_count
    )
}

pub fn get_capabilities_response(
    device_xaddr: &str,
    media_xaddr: &str,
    minor_version: u16,
    profile_count: usize,
    include_device: bool,
    include_media: bool,
) -> String {
    let mut blocks = String::new();
    if include_device {
        blocks.push_str(&device_capabilities_block(device_xaddr, minor_version));
    }
    if include_media {
        blocks.push_str(&media_capabilities_block(media_xaddr, profile_count));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:tds="http://www.onvif.org/ver10/device/wsdl"
            xmlns:tt="http://www.onvif.org/ver10/schema">
  <s:Body>
    <tds:GetCapabilitiesResponse>
      <tds:Capabilities>{}
      </tds:Capabilities>
    </tds:GetCapabilitiesResponse>
  </s:Body>
</s:Envelope>"#,
        blocks
    )
}

pub fn get_services_response(device_xaddr: &str, media_xaddr: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:tds="http://www.onvif.org/ver10/device/wsdl"
            xmlns:tt="http://www.onvif.org/ver10/schema">
  <s:Body>
    <tds:GetServicesResponse>
      <tds:Service>
        <tds:Namespace>http://www.onvif.org/ver10/device/wsdl</tds:Namespace>
        <tds:XAddr>{}</tds:XAddr>
        <tds:Version><tt:Major>2</tt:Major><tt:Minor>5</tt:Minor></tds:Version>
      </tds:Service>
      <tds:Service>
        <tds:Namespace>http://www.onvif.org/ver10/media/wsdl</tds:Namespace>
        <tds:XAddr>{}</tds:XAddr>
        <tds:Version><tt:Major>2</tt:Major><tt:Minor>5</tt:Minor></tds:Version>
      </tds:Service>
    </tds:GetServicesResponse>
  </s:Body>
</s:Envelope>"#,
        xml_escape(device_xaddr),
        xml_escape(media_xaddr)
    )
}

pub fn get_device_information_response(
    manufacturer: &str,
    model: &str,
    firmware_version: &str,
    serial_number: &str,
    hardware_id: &str,
) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:tds="http://www.onvif.org/ver10/device/wsdl">
  <s:Body>
    <tds:GetDeviceInformationResponse>
      <tds:Manufacturer>{}</tds:Manufacturer>
      <tds:Model>{}</tds:Model>
      <tds:FirmwareVersion>{}</tds:FirmwareVersion>
      <tds:SerialNumber>{}</tds:SerialNumber>
      <tds:HardwareId>{}</tds:HardwareId>
    </tds:GetDeviceInformationResponse>
  </s:Body>
</s:Envelope>"#,
        xml_escape(manufacturer),
        xml_escape(model),
        xml_escape(firmware_version),
        xml_escape(serial_number),
        xml_escape(hardware_id)
    )
}

/// One media profile element. `encoder_token`/`encoder_name` distinguish the
/// high and low quality encoder configurations.
#[allow(clippy::too_many_arguments)]
pub fn profile_xml(
    token: &str,
    name: &str,
    encoder_token: &str,
    encoder_name: &str,
    source_width: u32,
    source_height: u32,
    width: u32,
    height: u32,
    framerate: u32,
    bitrate: u32,
    quality: u32,
) -> String {
    format!(
        r#"
      <trt:Profiles token="{token}" fixed="true">
        <tt:Name>{name}</tt:Name>
        <tt:VideoSourceConfiguration token="video_src_config_token">
          <tt:Name>VideoSource</tt:Name>
          <tt:UseCount>2</tt:UseCount>
          <tt:SourceToken>video_src_token</tt:SourceToken>
          <tt:Bounds x="0" y="0" width="{sw}" height="{sh}"/>
        </tt:VideoSourceConfiguration>
        <tt:VideoEncoderConfiguration token="{etoken}">
          <tt:Name>{ename}</tt:Name>
          <tt:UseCount>1</tt:UseCount>
          <tt:Encoding>H264</tt:Encoding>
          <tt:Resolution>
            <tt:Width>{w}</tt:Width>
            <tt:Height>{h}</tt:Height>
          </tt:Resolution>
          <tt:Quality>{q}</tt:Quality>
          <tt:RateControl>
            <tt:FrameRateLimit>{fr}</tt:FrameRateLimit>
            <tt:EncodingInterval>1</tt:EncodingInterval>
            <tt:BitrateLimit>{br}</tt:BitrateLimit>
          </tt:RateControl>
          <tt:H264>
            <tt:GovLength>{fr}</tt:GovLength>
            <tt:H264Profile>Main</tt:H264Profile>
          </tt:H264>
          <tt:SessionTimeout>PT1000S</tt:SessionTimeout>
        </tt:VideoEncoderConfiguration>
      </trt:Profiles>"#,
        token = xml_escape(token),
        name = xml_escape(name),
        etoken = xml_escape(encoder_token),
        ename = xml_escape(encoder_name),
        sw = source_width,
        sh = source_height,
        w = width,
        h = height,
        fr = framerate,
        br = bitrate,
        q = quality,
    )
}

pub fn get_profiles_response(profiles: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:trt="http://www.onvif.org/ver10/media/wsdl"
            xmlns:tt="http://www.onvif.org/ver10/schema">
  <s:Body>
    <trt:GetProfilesResponse>{}
    </trt:GetProfilesResponse>
  </s:Body>
</s:Envelope>"#,
        profiles
    )
}

pub fn get_video_sources_response(width: u32, height: u32, framerate: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:trt="http://www.onvif.org/ver10/media/wsdl"
            xmlns:tt="http://www.onvif.org/ver10/schema">
  <s:Body>
    <trt:GetVideoSourcesResponse>
      <trt:VideoSources token="video_src_token">
        <tt:Framerate>{}</tt:Framerate>
        <tt:Resolution>
          <tt:Width>{}</tt:Width>
          <tt:Height>{}</tt:Height>
        </tt:Resolution>
      </trt:VideoSources>
    </trt:GetVideoSourcesResponse>
  </s:Body>
</s:Envelope>"#,
        framerate, width, height
    )
}

fn media_uri_response(wrapper: &str, uri: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:trt="http://www.onvif.org/ver10/media/wsdl"
            xmlns:tt="http://www.onvif.org/ver10/schema">
  <s:Body>
    <trt:{wrapper}>
      <trt:MediaUri>
        <tt:Uri>{uri}</tt:Uri>
        <tt:InvalidAfterConnect>false</tt:InvalidAfterConnect>
        <tt:InvalidAfterReboot>false</tt:InvalidAfterReboot>
        <tt:Timeout>PT30S</tt:Timeout>
      </trt:MediaUri>
    </trt:{wrapper}>
  </s:Body>
</s:Envelope>"#,
        wrapper = wrapper,
        uri = xml_escape(uri),
    )
}

pub fn get_stream_uri_response(uri: &str) -> String {
    media_uri_response("GetStreamUriResponse", uri)
}

pub fn get_snapshot_uri_response(uri: &str) -> String {
    media_uri_response("GetSnapshotUriResponse", uri)
}

/// One ProbeMatch element. The hardware/name scope lines vary per camera to
/// keep NVR-side device fingerprints from colliding.
pub fn probe_match_xml(uuid: &str, name: &str, hostname: &str, port: u16) -> String {
    format!(
        r#"
      <d:ProbeMatch>
        <wsa:EndpointReference>
          <wsa:Address>urn:uuid:{uuid}</wsa:Address>
        </wsa:EndpointReference>
        <d:Types>dn:NetworkVideoTransmitter</d:Types>
        <d:Scopes>onvif://www.onvif.org/type/video_encoder onvif://www.onvif.org/hardware/VirtualCamera{port} onvif://www.onvif.org/name/{scope_name} onvif://www.onvif.org/location/ onvif://www.onvif.org/Profile/Streaming</d:Scopes>
        <d:XAddrs>http://{hostname}:{port}/onvif/device_service</d:XAddrs>
        <d:MetadataVersion>1</d:MetadataVersion>
      </d:ProbeMatch>"#,
        uuid = xml_escape(uuid),
        scope_name = xml_escape(&name.replace(' ', "_")),
        hostname = xml_escape(hostname),
        port = port,
    )
}

/// ProbeMatches envelope. `relates_to` echoes the probe's MessageID
/// verbatim; `message_number` is the process-lifetime AppSequence counter.
pub fn probe_matches_envelope(
    message_id: &str,
    relates_to: &str,
    message_number: u64,
    instance_id: i64,
    matches: &str,
) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://www.w3.org/2003/05/soap-envelope" xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery" xmlns:dn="http://www.onvif.org/ver10/network/wsdl">
  <SOAP-ENV:Header>
    <wsa:MessageID>uuid:{message_id}</wsa:MessageID>
    <wsa:RelatesTo>{relates_to}</wsa:RelatesTo>
    <wsa:To SOAP-ENV:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</wsa:To>
    <wsa:Action SOAP-ENV:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2005/04/discovery/ProbeMatches</wsa:Action>
    <d:AppSequence SOAP-ENV:mustUnderstand="true" MessageNumber="{message_number}" InstanceId="{instance_id}"/>
  </SOAP-ENV:Header>
  <SOAP-ENV:Body>
    <d:ProbeMatches>{matches}
    </d:ProbeMatches>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#,
        message_id = xml_escape(message_id),
        relates_to = xml_escape(relates_to),
        message_number = message_number,
        instance_id = instance_id,
        matches = matches,
    )
}
