use quick_xml::escape::escape;
use std::fmt::Write as _;

use mhs_envelope::interactions;

use super::{message_id, MessageBuilder, MessageRecord, TemplateError};

const PDS_SERVICE: &str = "urn:nhs:names:services:pdsquery";
const GP2GP_SERVICE: &str = "urn:nhs:names:services:gp2gp";
const NHS_NUMBER_OID: &str = "2.16.840.1.113883.2.1.4.1";
const ASID_OID: &str = "1.2.826.0.1285.0.2.0.107";

/// Fragments a continue request is answered with.
pub const FRAGMENT_COUNT: u8 = 3;

/// Templates for every envelope the gateway and the simulated MHS emit.
#[derive(Debug, Clone, Copy, Default)]
pub struct EbxmlTemplates;

impl EbxmlTemplates {
    pub fn new() -> Self {
        Self
    }

    /// `QUPA_IN000008UK02` PDS retrieval query.
    pub fn pds_retrieval_query(&self, record: &MessageRecord) -> Result<String, TemplateError> {
        let nhs_number = record.nhs_number()?;
        let payload = format!(
            r#"<QUPA_IN000008UK02 xmlns="urn:hl7-org:v3">
      {header}
      <ControlActEvent classCode="CACT" moodCode="EVN">
        <author1 typeCode="AUT">
          <AgentSystemSDS classCode="AGNT">
            <agentSystemSDS classCode="DEV" determinerCode="INSTANCE">
              <id root="{ASID_OID}" extension="{sender_asid}"/>
            </agentSystemSDS>
          </AgentSystemSDS>
        </author1>
        <query>
          <historicDataIndicator><value code="0" codeSystem="2.16.840.1.113883.2.1.3.2.4.17.36"/></historicDataIndicator>
          <person.id><value root="{NHS_NUMBER_OID}" extension="{nhs_number}"/></person.id>
          <retrievalItem><semanticsText>person.allData</semanticsText></retrievalItem>
        </query>
      </ControlActEvent>
    </QUPA_IN000008UK02>"#,
            header = hl7_header(interactions::PDS_RETRIEVAL_QUERY, record),
            sender_asid = escape(&record.sending_service.asid),
            nhs_number = escape(nhs_number),
        );
        Ok(envelope(
            interactions::PDS_RETRIEVAL_QUERY,
            PDS_SERVICE,
            record,
            &payload,
        ))
    }

    /// `QUPA_IN000009UK03` PDS retrieval response, as the MHS returns it.
    pub fn pds_retrieval_response(&self, record: &MessageRecord) -> String {
        let nhs_number = record.nhs_number().unwrap_or_default();
        let payload = format!(
            r#"<QUPA_IN000009UK03 xmlns="urn:hl7-org:v3">
      {header}
      <ControlActEvent classCode="CACT" moodCode="EVN">
        <subject typeCode="SUBJ">
          <PdsSuccessfulRetrieval classCode="OBS" moodCode="EVN">
            <subject typeCode="SBJ">
              <patientRole classCode="PAT">
                <id root="{NHS_NUMBER_OID}" extension="{nhs_number}"/>
              </patientRole>
            </subject>
          </PdsSuccessfulRetrieval>
        </subject>
        <queryAck type="QueryAck"><queryResponseCode code="OK"/></queryAck>
      </ControlActEvent>
    </QUPA_IN000009UK03>"#,
            header = hl7_header(interactions::PDS_RETRIEVAL_RESPONSE, record),
            nhs_number = escape(nhs_number),
        );
        envelope(
            interactions::PDS_RETRIEVAL_RESPONSE,
            PDS_SERVICE,
            record,
            &payload,
        )
    }

    /// `RCMR_IN010000UK05` GP2GP EHR request.
    pub fn ehr_request(&self, record: &MessageRecord) -> Result<String, TemplateError> {
        let nhs_number = record.nhs_number()?;
        let payload = format!(
            r#"<RCMR_IN010000UK05 xmlns="urn:hl7-org:v3">
      {header}
      <ControlActEvent classCode="CACT" moodCode="EVN">
        <subject typeCode="SUBJ" contextConductionInd="false">
          <EhrRequest classCode="EXTRACT" moodCode="RQO">
            <id root="{id}"/>
            <recordTarget typeCode="RCT">
              <patient classCode="PAT">
                <id root="{NHS_NUMBER_OID}" extension="{nhs_number}"/>
              </patient>
            </recordTarget>
            <author typeCode="AUT">
              <AgentOrgSDS classCode="AGNT">
                <agentOrganizationSDS classCode="ORG" determinerCode="INSTANCE">
                  <id root="1.2.826.0.1285.0.1.10" extension="{receiver_ods}"/>
                </agentOrganizationSDS>
              </AgentOrgSDS>
            </author>
            <destination typeCode="DST">
              <AgentOrgSDS classCode="AGNT">
                <agentOrganizationSDS classCode="ORG" determinerCode="INSTANCE">
                  <id root="1.2.826.0.1285.0.1.10" extension="{sender_ods}"/>
                </agentOrganizationSDS>
              </AgentOrgSDS>
            </destination>
          </EhrRequest>
        </subject>
      </ControlActEvent>
    </RCMR_IN010000UK05>"#,
            header = hl7_header(interactions::EHR_REQUEST, record),
            id = escape(&record.id),
            nhs_number = escape(nhs_number),
            sender_ods = escape(&record.sending_service.ods_code),
            receiver_ods = escape(&record.receiving_service.ods_code),
        );
        Ok(envelope(
            interactions::EHR_REQUEST,
            GP2GP_SERVICE,
            record,
            &payload,
        ))
    }

    /// `RCMR_IN030000UK06` EHR extract answering an EHR request.
    pub fn ehr_extract(&self, record: &MessageRecord) -> String {
        let nhs_number = record.nhs_number().unwrap_or_default();
        let payload = format!(
            r#"<RCMR_IN030000UK06 xmlns="urn:hl7-org:v3">
      {header}
      <ControlActEvent classCode="CACT" moodCode="EVN">
        <subject typeCode="SUBJ" contextConductionInd="false">
          <EhrExtract classCode="EXTRACT" moodCode="EVN">
            <id root="{extract_id}"/>
            <recordTarget typeCode="RCT">
              <patient classCode="PAT">
                <id root="{NHS_NUMBER_OID}" extension="{nhs_number}"/>
              </patient>
            </recordTarget>
            <availabilityTime value="{timestamp}"/>
          </EhrExtract>
        </subject>
      </ControlActEvent>
    </RCMR_IN030000UK06>"#,
            header = hl7_header(interactions::EHR_EXTRACT, record),
            extract_id = message_id(),
            nhs_number = escape(nhs_number),
            timestamp = escape(&record.timestamp),
        );
        envelope(interactions::EHR_EXTRACT, GP2GP_SERVICE, record, &payload)
    }

    /// Large-message fragment `index` of [`FRAGMENT_COUNT`].
    pub fn fragment(&self, record: &MessageRecord, index: u8) -> String {
        let payload = format!(
            r#"<COPC_IN000001UK01 xmlns="urn:hl7-org:v3">
      {header}
      <ControlActEvent classCode="CACT" moodCode="EVN">
        <subject typeCode="SUBJ" contextConductionInd="false">
          <PayloadInformation classCode="OBS" moodCode="EVN">
            <code code="GP2GPLMATTACHMENTINFO" codeSystem="2.16.840.1.113883.2.1.3.2.4.17.202"/>
            <id root="{fragment_id}"/>
            <messageType root="2.16.840.1.113883.2.1.3.2.4.18.17" extension="RCMR_MT000001GB01"/>
            <value>
              <Gp2gpfragment xmlns="urn:nhs:names:services:gp2gp">
                <Version>01</Version>
                <Recipients><Recipient>{receiver_ods}</Recipient></Recipients>
                <From>{sender_ods}</From>
                <subject>Attachment fragment {index} of {FRAGMENT_COUNT}</subject>
                <message-id>{fragment_id}</message-id>
              </Gp2gpfragment>
            </value>
          </PayloadInformation>
        </subject>
      </ControlActEvent>
    </COPC_IN000001UK01>"#,
            header = hl7_header(interactions::CONTINUE_REQUEST, record),
            fragment_id = message_id(),
            sender_ods = escape(&record.sending_service.ods_code),
            receiver_ods = escape(&record.receiving_service.ods_code),
        );
        envelope(
            interactions::CONTINUE_REQUEST,
            GP2GP_SERVICE,
            record,
            &payload,
        )
    }

    /// `MCCI_IN010000UK13` positive acknowledgement of `acknowledged_id`.
    pub fn acknowledgement(&self, record: &MessageRecord, acknowledged_id: &str) -> String {
        let payload = format!(
            r#"<MCCI_IN010000UK13 xmlns="urn:hl7-org:v3">
      {header}
      <acknowledgement typeCode="AA">
        <messageRef><id root="{acknowledged_id}"/></messageRef>
      </acknowledgement>
    </MCCI_IN010000UK13>"#,
            header = hl7_header(interactions::ACKNOWLEDGEMENT, record),
            acknowledged_id = escape(acknowledged_id),
        );
        envelope(
            interactions::ACKNOWLEDGEMENT,
            GP2GP_SERVICE,
            record,
            &payload,
        )
    }
}

impl MessageBuilder for EbxmlTemplates {
    fn build(&self, interaction_id: &str, record: &MessageRecord) -> Result<String, TemplateError> {
        match interaction_id {
            interactions::PDS_RETRIEVAL_QUERY => self.pds_retrieval_query(record),
            interactions::EHR_REQUEST => self.ehr_request(record),
            other => Err(TemplateError::UnknownInteraction(other.to_string())),
        }
    }
}

/// HL7 transmission wrapper shared by every payload.
fn hl7_header(interaction_id: &str, record: &MessageRecord) -> String {
    format!(
        r#"<id root="{message_id}"/>
      <creationTime value="{timestamp}"/>
      <versionCode code="V3NPfIT3.0"/>
      <interactionId root="2.16.840.1.113883.2.1.3.2.4.12" extension="{interaction_id}"/>
      <processingCode code="P"/>
      <processingModeCode code="T"/>
      <acceptAckCode code="NE"/>
      <communicationFunctionRcv typeCode="RCV">
        <device classCode="DEV" determinerCode="INSTANCE">
          <id root="{ASID_OID}" extension="{receiver_asid}"/>
        </device>
      </communicationFunctionRcv>
      <communicationFunctionSnd typeCode="SND">
        <device classCode="DEV" determinerCode="INSTANCE">
          <id root="{ASID_OID}" extension="{sender_asid}"/>
        </device>
      </communicationFunctionSnd>"#,
        message_id = message_id(),
        timestamp = escape(&record.timestamp),
        receiver_asid = escape(&record.receiving_service.asid),
        sender_asid = escape(&record.sending_service.asid),
    )
}

fn envelope(action: &str, service: &str, record: &MessageRecord, payload: &str) -> String {
    let mut doc = String::with_capacity(payload.len() + 1024);
    // Writing into a String cannot fail.
    let _ = write!(
        doc,
        r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/" xmlns:eb="http://www.oasis-open.org/committees/ebxml-msg/schema/msg-header-2_0.xsd" xmlns:hl7ebxml="urn:hl7-org:transport/ebxml/DSTUv1.0">
  <SOAP-ENV:Header>
    <eb:MessageHeader SOAP-ENV:mustUnderstand="1" eb:version="2.0">
      <eb:From><eb:PartyId eb:type="urn:nhs:names:partyType:ocs+serviceInstance">{sender_ods}</eb:PartyId></eb:From>
      <eb:To><eb:PartyId eb:type="urn:nhs:names:partyType:ocs+serviceInstance">{receiver_ods}</eb:PartyId></eb:To>
      <eb:CPAId>S20001A000100</eb:CPAId>
      <eb:ConversationId>{conversation_id}</eb:ConversationId>
      <eb:Service>{service}</eb:Service>
      <eb:Action>{action}</eb:Action>
      <eb:MessageData>
        <eb:MessageId>{message_id}</eb:MessageId>
        <eb:Timestamp>{timestamp}</eb:Timestamp>
      </eb:MessageData>
    </eb:MessageHeader>
  </SOAP-ENV:Header>
  <SOAP-ENV:Body>
    {payload}
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#,
        sender_ods = escape(&record.sending_service.ods_code),
        receiver_ods = escape(&record.receiving_service.ods_code),
        conversation_id = escape(&record.id),
        message_id = message_id(),
        timestamp = escape(&record.timestamp),
    );
    doc
}
